use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tsship_core::{
    Datapoint, DrainReport, IdentityCache, MetricIdentity, MetricValue, OfflineSink,
};
use tsship_persistent_storage::PersistenceManager;

use crate::batch_buffer::{Batch, BatchBuffer};
use crate::connectivity::{Connectivity, ConnectivityEvent};
use crate::errors::{Result, ShipperError};
use crate::health_check::HealthProbe;
use crate::http_shipper::{BatchOutcome, HttpShipper, ShipperStats};
use crate::options::ShipperOptions;

// Shortest period of the batch age check.
const MIN_FLUSH_CHECK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub shipper: ShipperStats,
    pub buffered_points: usize,
    pub pending_offline_entries: u64,
    pub identities: u64,
    pub connected: bool,
}

/// Composition root wiring the identity cache, batch buffer, shipper, connectivity probe and
/// offline storage together.
///
/// Producers call `record_measurement` (or `intern` once and `record` many times) from any
/// thread; nothing on that path waits on the network or the disk. Batches are sent on the
/// runtime captured by `start`.
#[derive(Debug)]
pub struct Pipeline {
    options: ShipperOptions,
    runtime: Handle,
    cache: IdentityCache,
    connectivity: Arc<Connectivity>,
    persistence: Option<Arc<PersistenceManager>>,
    shipper: Arc<HttpShipper>,
    buffer: Arc<BatchBuffer>,
    schedules: Mutex<Vec<JoinHandle<()>>>,
    // flipped to true once by `shutdown`; every schedule watches it
    stop: watch::Sender<bool>,
    in_flight: Mutex<JoinSet<()>>,
    shut_down: AtomicBool,
}

impl Pipeline {
    /// Build every component and start the background schedules.
    ///
    /// Offline storage that cannot be opened (locked by another instance, unwritable) is
    /// disabled for the process lifetime; the pipeline still runs, dropping what it cannot send.
    pub async fn start(options: ShipperOptions) -> Result<Self> {
        options.validate()?;

        let cache = IdentityCache::new(options.identity_cache.clone());
        let connectivity = Arc::new(Connectivity::new());

        let persistence = if options.persistence_enabled {
            match PersistenceManager::open(options.persistence.clone()).await {
                Ok(pm) => Some(pm),
                Err(e) => {
                    error!(target = "pipeline", dir = %options.persistence.dir.display(), error = %e, "offline storage unavailable; persistence disabled, data will be lost while the endpoint is down");
                    None
                }
            }
        } else {
            info!(target = "pipeline", "offline storage disabled by configuration");
            None
        };

        let shipper = Arc::new(HttpShipper::new(
            &options,
            Arc::clone(&connectivity),
            persistence.clone(),
        )?);
        let buffer = Arc::new(BatchBuffer::new(options.batch_size, options.batch_time()));
        let probe = Arc::new(HealthProbe::new(&options, Arc::clone(&connectivity))?);

        let (stop, _) = watch::channel(false);
        let mut schedules = Vec::new();
        // subscribe before the first probe so the initial Connected is not missed
        schedules.push(spawn_reconnect_listener(
            connectivity.subscribe(),
            Arc::clone(&shipper),
            stop.subscribe(),
        ));
        schedules.push(probe.start(options.probe_period(), stop.subscribe()));
        schedules.push(spawn_flush_timer(
            Arc::clone(&buffer),
            Arc::clone(&shipper),
            stop.subscribe(),
        ));
        if let (Some(period), true) = (options.drain_interval(), persistence.is_some()) {
            schedules.push(spawn_periodic_drain(
                period,
                Arc::clone(&shipper),
                stop.subscribe(),
            ));
        }

        info!(
            target = "pipeline",
            endpoint = %options.endpoint,
            batch_size = options.batch_size,
            batch_time_ms = options.batch_time_ms,
            compression = options.compression,
            response_mode = ?options.response_mode,
            persistence = persistence.is_some(),
            "shipping pipeline started"
        );

        Ok(Self {
            runtime: Handle::current(),
            options,
            cache,
            connectivity,
            persistence,
            shipper,
            buffer,
            schedules: Mutex::new(schedules),
            stop,
            in_flight: Mutex::new(JoinSet::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn options(&self) -> &ShipperOptions {
        &self.options
    }

    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.connectivity
    }

    pub fn shipper(&self) -> &Arc<HttpShipper> {
        &self.shipper
    }

    /// Offline storage, while it is usable.
    pub fn persistence(&self) -> Option<&Arc<PersistenceManager>> {
        self.shipper.persistence()
    }

    /// Current time in the configured timestamp unit.
    pub fn timestamp_now(&self) -> i64 {
        self.options.timestamp_unit.now()
    }

    pub fn intern<I, K, V>(&self, name: &str, tags: I) -> Result<Arc<MetricIdentity>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Ok(self.cache.intern(name, tags)?)
    }

    /// Record one sample. Fails only on invalid input or after shutdown.
    pub fn record_measurement<I, K, V>(
        &self,
        name: &str,
        tags: I,
        timestamp: i64,
        value: impl Into<MetricValue>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let identity = self.intern(name, tags)?;
        self.record(&identity, timestamp, value)
    }

    /// Record one sample for an already interned identity.
    pub fn record(
        &self,
        identity: &Arc<MetricIdentity>,
        timestamp: i64,
        value: impl Into<MetricValue>,
    ) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ShipperError::ShutDown);
        }
        let datapoint = Datapoint::new(Arc::clone(identity), timestamp, value)?;
        if let Some(batch) = self.buffer.push(&datapoint) {
            self.dispatch(batch);
        }
        Ok(())
    }

    fn dispatch(&self, batch: Batch) {
        let shipper = Arc::clone(&self.shipper);
        let mut in_flight = self.in_flight.lock();
        // reap finished sends so the set only holds live ones
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn_on(
            async move {
                shipper.send(batch).await;
            },
            &self.runtime,
        );
    }

    /// Flush whatever is buffered now, regardless of thresholds.
    pub async fn tick(&self) -> Option<BatchOutcome> {
        let batch = self.buffer.take()?;
        Some(self.shipper.send(batch).await)
    }

    /// Drain the offline backlog now, if storage is enabled and the endpoint is up.
    pub async fn flush_offline(&self) -> Option<DrainReport> {
        let pm = self.shipper.persistence()?;
        if self.connectivity.is_down() {
            return None;
        }
        let sink: Arc<dyn OfflineSink> = self.shipper.clone();
        Some(pm.flush_to_server(sink).await)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            shipper: self.shipper.stats(),
            buffered_points: self.buffer.len(),
            pending_offline_entries: self
                .persistence
                .as_ref()
                .map_or(0, |pm| pm.pending_entries()),
            identities: self.cache.len(),
            connected: !self.connectivity.is_down(),
        }
    }

    /// Stop the schedules and let the sends they started finish, flush the buffer (to the
    /// endpoint or offline storage), wait for in-flight sends and release the storage
    /// directory.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.send_replace(true);
        if let Some(pm) = &self.persistence {
            pm.stop_draining();
        }

        // a schedule stops between ticks; a send it already started runs to completion
        let mut schedules = std::mem::take(&mut *self.schedules.lock());
        let schedule_budget = self
            .send_budget()
            .max(self.options.send_timeout() * self.options.max_concurrent_flushes as u32);
        let joined = tokio::time::timeout(schedule_budget, async {
            for handle in schedules.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;
        if joined.is_err() {
            // a cancelled drain leaves its entries parked; persistence shutdown re-queues them
            warn!(target = "pipeline", "background tasks did not stop in time; aborting them");
            for handle in &schedules {
                handle.abort();
            }
        }

        if let Some(batch) = self.buffer.take() {
            let outcome = self.shipper.send(batch).await;
            debug!(target = "pipeline", ?outcome, "flushed buffer on shutdown");
        }

        let mut in_flight = std::mem::take(&mut *self.in_flight.lock());
        let waited = tokio::time::timeout(self.send_budget(), async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if waited.is_err() {
            warn!(target = "pipeline", remaining = in_flight.len(), "in-flight sends did not finish before shutdown");
            in_flight.abort_all();
        }

        if let Some(pm) = &self.persistence {
            pm.shutdown().await;
        }
        let stats = self.shipper.stats();
        info!(
            target = "pipeline",
            sent = stats.sent_batches,
            buffered = stats.buffered_batches,
            dropped = stats.dropped_batches,
            success = stats.success,
            failed = stats.failed,
            "shipping pipeline stopped"
        );
    }

    // Longest a single batch send can take, retries included.
    fn send_budget(&self) -> Duration {
        self.options.send_timeout() * (self.options.retry_count as u32 + 1)
            + self.options.retry_delay() * self.options.retry_count as u32
    }
}

fn spawn_reconnect_listener(
    mut events: broadcast::Receiver<ConnectivityEvent>,
    shipper: Arc<HttpShipper>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = stop.changed() => break,
                event = events.recv() => event,
            };
            let drain = match event {
                Ok(ConnectivityEvent::Connected) | Ok(ConnectivityEvent::Reconnected) => true,
                Ok(ConnectivityEvent::Disconnected) => false,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "pipeline", skipped, "connectivity listener lagged");
                    !shipper.connectivity().is_down()
                }
                Err(RecvError::Closed) => break,
            };
            if !drain {
                continue;
            }
            if let Some(pm) = shipper.persistence() {
                let sink: Arc<dyn OfflineSink> = shipper.clone();
                let report = pm.flush_to_server(sink).await;
                debug!(target = "pipeline", entries = report.entries, aborted = report.aborted, "reconnect drain done");
            }
        }
    })
}

fn spawn_flush_timer(
    buffer: Arc<BatchBuffer>,
    shipper: Arc<HttpShipper>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = (buffer.time_threshold() / 2).max(MIN_FLUSH_CHECK);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    if let Some(batch) = buffer.take_if_aged() {
                        shipper.send(batch).await;
                    }
                }
            }
        }
    })
}

fn spawn_periodic_drain(
    period: Duration,
    shipper: Arc<HttpShipper>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the reconnect listener covers startup
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {}
            }
            let Some(persistence) = shipper.persistence() else {
                continue;
            };
            if shipper.connectivity().is_down()
                || persistence.is_draining()
                || persistence.pending_entries() == 0
            {
                continue;
            }
            let sink: Arc<dyn OfflineSink> = shipper.clone();
            persistence.flush_to_server(sink).await;
        }
    })
}
