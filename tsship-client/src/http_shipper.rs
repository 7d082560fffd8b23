use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use tsship_core::{OfflineSink, SendOutcome};
use tsship_persistent_storage::compression;
use tsship_persistent_storage::PersistenceManager;

use crate::batch_buffer::Batch;
use crate::connectivity::Connectivity;
use crate::errors::{Result, ShipperError};
use crate::options::ShipperOptions;
use crate::response_handler::{ResponseClass, ResponseMode, ResponseVerdict};
use crate::retry_manager::RetryManager;
use crate::shipper_metrics::{
    SHIPPER_BAD_CONTENT_TOTAL, SHIPPER_BATCHES_BUFFERED_TOTAL, SHIPPER_BATCHES_DROPPED_TOTAL,
    SHIPPER_BATCHES_SENT_TOTAL, SHIPPER_BATCH_POINTS, SHIPPER_COMPRESSION_ENABLED,
    SHIPPER_POINTS_FAILED_TOTAL, SHIPPER_POINTS_SUCCESS_TOTAL, SHIPPER_RETRIES_TOTAL,
    SHIPPER_SEND_LATENCY_MS,
};

/// Where a batch ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Delivered { success: u64, failed: u64 },
    Rejected { failed: u64 },
    /// Written to offline storage for a later drain.
    Buffered,
    /// Lost: offline storage unavailable or the write failed.
    Dropped,
}

/// Point-in-time copy of the shipper's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipperStats {
    pub sent_batches: u64,
    pub buffered_batches: u64,
    pub dropped_batches: u64,
    pub success: u64,
    pub failed: u64,
    pub bad_content: u64,
    pub retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent_batches: AtomicU64,
    buffered_batches: AtomicU64,
    dropped_batches: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    bad_content: AtomicU64,
    retries: AtomicU64,
}

/// Posts batches to the ingestion endpoint and falls back to offline storage.
///
/// While connectivity is down every batch goes straight to storage without touching the
/// network. Otherwise a batch is posted, transient failures are retried with a fixed delay,
/// and a batch that still cannot be sent marks the endpoint down and is stored. Rejections
/// are counted and dropped: the data is presumed invalid.
#[derive(Debug)]
pub struct HttpShipper {
    http: reqwest::Client,
    put_url: reqwest::Url,
    response_mode: ResponseMode,
    compression: AtomicBool,
    retry: RetryManager,
    max_concurrent_flushes: usize,
    send_timeout: Duration,
    connectivity: Arc<Connectivity>,
    persistence: Option<Arc<PersistenceManager>>,
    // latched on the first failed offline write
    storage_failed: AtomicBool,
    counters: Counters,
}

impl HttpShipper {
    pub fn new(
        options: &ShipperOptions,
        connectivity: Arc<Connectivity>,
        persistence: Option<Arc<PersistenceManager>>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout())
            .timeout(options.request_timeout())
            .build()?;
        metrics::gauge!(SHIPPER_COMPRESSION_ENABLED.name).set(if options.compression { 1.0 } else { 0.0 });
        Ok(Self {
            http,
            put_url: options.put_url()?,
            response_mode: options.response_mode,
            compression: AtomicBool::new(options.compression),
            retry: RetryManager::new(options.retry_count, options.retry_delay()),
            max_concurrent_flushes: options.max_concurrent_flushes.max(1),
            send_timeout: options.send_timeout(),
            connectivity,
            persistence,
            storage_failed: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression.load(Ordering::Acquire)
    }

    /// Offline storage, unless it was never enabled or a write to it has failed.
    pub fn persistence(&self) -> Option<&Arc<PersistenceManager>> {
        if self.storage_failed.load(Ordering::Acquire) {
            return None;
        }
        self.persistence.as_ref()
    }

    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.connectivity
    }

    /// Deliver one batch, or store it when the endpoint cannot take it.
    ///
    /// Never fails: every outcome is accounted for in `stats()`.
    pub async fn send(&self, batch: Batch) -> BatchOutcome {
        metrics::histogram!(SHIPPER_BATCH_POINTS.name).record(batch.points as f64);

        if self.connectivity.is_down() {
            debug!(target = "http_shipper", points = batch.points, "endpoint is down; buffering batch");
            return self.offline(batch.body).await;
        }

        let (mut payload, mut compressed) = self.encode(batch.body);
        loop {
            match self.post_with_retry(&payload, compressed, batch.points).await {
                Ok(verdict) if verdict.disable_compression && compressed => {
                    // the endpoint could not read gzip; resend this batch as plain JSON
                    self.disable_compression();
                    match compression::decompress(&payload) {
                        Ok(raw) => {
                            payload = raw;
                            compressed = false;
                        }
                        Err(e) => {
                            error!(target = "http_shipper", error = %e, "cannot decompress own batch");
                            return self.account(verdict);
                        }
                    }
                }
                Ok(verdict) => return self.account(verdict),
                Err(e) => {
                    warn!(target = "http_shipper", url = %self.put_url, points = batch.points, error = %e, "batch send failed; buffering");
                    self.connectivity.record_failure();
                    return self.offline(payload).await;
                }
            }
        }
    }

    fn encode(&self, body: Vec<u8>) -> (Vec<u8>, bool) {
        if !self.compression_enabled() {
            return (body, false);
        }
        match compression::compress(&body) {
            Ok(gz) => (gz, true),
            Err(e) => {
                warn!(target = "http_shipper", error = %e, "gzip failed; sending batch uncompressed");
                (body, false)
            }
        }
    }

    async fn post_with_retry(
        &self,
        payload: &[u8],
        compressed: bool,
        points: usize,
    ) -> Result<ResponseVerdict> {
        let mut attempt = 0;
        loop {
            match self.post_once(payload.to_vec(), compressed, points).await {
                Ok(verdict) => return Ok(verdict),
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    attempt += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(SHIPPER_RETRIES_TOTAL.name).increment(1);
                    debug!(target = "http_shipper", attempt, max_retries = self.retry.max_retries(), error = %e, "retrying batch send");
                    tokio::time::sleep(self.retry.delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(
        &self,
        payload: Vec<u8>,
        compressed: bool,
        points: usize,
    ) -> Result<ResponseVerdict> {
        let started = Instant::now();
        let mut request = self
            .http
            .post(self.put_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        if compressed {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        metrics::histogram!(SHIPPER_SEND_LATENCY_MS.name).record(started.elapsed().as_secs_f64() * 1000.0);

        let verdict = self.response_mode.process(status, &body, points, compressed);
        if verdict.class == ResponseClass::Transient {
            return Err(ShipperError::TransientStatus(status));
        }
        if verdict.class == ResponseClass::Rejected {
            debug!(target = "http_shipper", status, body = %String::from_utf8_lossy(&body), "endpoint rejected batch");
        }
        Ok(verdict)
    }

    fn account(&self, verdict: ResponseVerdict) -> BatchOutcome {
        self.counters.sent_batches.fetch_add(1, Ordering::Relaxed);
        self.counters.success.fetch_add(verdict.success, Ordering::Relaxed);
        self.counters.failed.fetch_add(verdict.failed, Ordering::Relaxed);
        metrics::counter!(SHIPPER_BATCHES_SENT_TOTAL.name).increment(1);
        metrics::counter!(SHIPPER_POINTS_SUCCESS_TOTAL.name).increment(verdict.success);
        metrics::counter!(SHIPPER_POINTS_FAILED_TOTAL.name).increment(verdict.failed);

        match verdict.class {
            ResponseClass::Rejected => {
                self.counters.bad_content.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(SHIPPER_BAD_CONTENT_TOTAL.name).increment(1);
                warn!(target = "http_shipper", failed = verdict.failed, success = verdict.success, "endpoint rejected batch; not retrying");
                BatchOutcome::Rejected {
                    failed: verdict.failed,
                }
            }
            _ => {
                if verdict.failed > 0 {
                    warn!(target = "http_shipper", failed = verdict.failed, success = verdict.success, "endpoint refused some datapoints");
                }
                BatchOutcome::Delivered {
                    success: verdict.success,
                    failed: verdict.failed,
                }
            }
        }
    }

    async fn offline(&self, payload: Vec<u8>) -> BatchOutcome {
        let Some(persistence) = self.persistence() else {
            warn!(target = "http_shipper", bytes = payload.len(), "offline storage unavailable; dropping batch");
            return self.drop_batch();
        };
        match persistence.offline(payload).await {
            Ok(_) => {
                self.counters.buffered_batches.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(SHIPPER_BATCHES_BUFFERED_TOTAL.name).increment(1);
                BatchOutcome::Buffered
            }
            Err(e) => {
                if !self.storage_failed.swap(true, Ordering::AcqRel) {
                    error!(target = "http_shipper", dir = %persistence.dir().display(), error = %e, "offline write failed; persistence disabled for the rest of the process lifetime, batches that cannot be sent will be dropped");
                }
                self.drop_batch()
            }
        }
    }

    fn drop_batch(&self) -> BatchOutcome {
        self.counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(SHIPPER_BATCHES_DROPPED_TOTAL.name).increment(1);
        BatchOutcome::Dropped
    }

    fn disable_compression(&self) {
        if self.compression.swap(false, Ordering::AcqRel) {
            metrics::gauge!(SHIPPER_COMPRESSION_ENABLED.name).set(0.0);
            warn!(target = "http_shipper", url = %self.put_url, "compression disabled for the rest of the process lifetime");
        }
    }

    pub fn stats(&self) -> ShipperStats {
        let c = &self.counters;
        ShipperStats {
            sent_batches: c.sent_batches.load(Ordering::Relaxed),
            buffered_batches: c.buffered_batches.load(Ordering::Relaxed),
            dropped_batches: c.dropped_batches.load(Ordering::Relaxed),
            success: c.success.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            bad_content: c.bad_content.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl OfflineSink for HttpShipper {
    /// Replay one stored blob: a single attempt, no retries, no re-buffering here (the drain
    /// re-queues on `Failed`).
    async fn send_blob(&self, blob: Vec<u8>) -> SendOutcome {
        let raw = match compression::ensure_decompressed(blob.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                error!(target = "http_shipper", error = %e, "stored blob is not valid gzip; discarding it");
                return SendOutcome::Rejected { failed: 0 };
            }
        };
        let points = count_points(&raw);
        let (payload, compressed) = if self.compression_enabled() && compression::is_compressed(&blob) {
            (blob, true)
        } else {
            (raw, false)
        };

        match self.post_once(payload, compressed, points).await {
            Ok(verdict) if verdict.disable_compression => {
                // keep it; the drain re-queues it and the next replay goes out uncompressed
                self.disable_compression();
                debug!(target = "http_shipper", points, "re-queuing blob refused as compressed");
                SendOutcome::Failed
            }
            Ok(verdict) => match self.account(verdict) {
                BatchOutcome::Rejected { failed } => SendOutcome::Rejected { failed },
                BatchOutcome::Delivered { success, failed } => {
                    SendOutcome::Delivered { success, failed }
                }
                BatchOutcome::Buffered | BatchOutcome::Dropped => SendOutcome::Failed,
            },
            Err(e) => {
                debug!(target = "http_shipper", error = %e, "replay send failed");
                self.connectivity.record_failure();
                SendOutcome::Failed
            }
        }
    }

    fn is_down(&self) -> bool {
        self.connectivity.is_down()
    }

    fn max_concurrent_flushes(&self) -> usize {
        self.max_concurrent_flushes
    }

    fn send_timeout(&self) -> Duration {
        self.send_timeout
    }
}

// Number of objects in a JSON array body; 0 when it cannot be read.
fn count_points(raw: &[u8]) -> usize {
    serde_json::from_slice::<Vec<serde::de::IgnoredAny>>(raw)
        .map(|points| points.len())
        .unwrap_or(0)
}
