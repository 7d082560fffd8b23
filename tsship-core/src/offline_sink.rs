use async_trait::async_trait;
use std::time::Duration;

/// Result of replaying one persisted blob to the ingestion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The endpoint answered; `failed` points were refused individually.
    Delivered { success: u64, failed: u64 },
    /// The endpoint refused the content as a whole; retrying cannot help.
    Rejected { failed: u64 },
    /// Network failure or timeout; the blob must be kept.
    Failed,
}

/// Destination a persistence drain replays backlog into.
///
/// Implemented by the HTTP shipper; the persistence layer only needs this narrow view of it.
#[async_trait]
pub trait OfflineSink: Send + Sync {
    /// Send one persisted blob (a gzip-compressed JSON array of datapoints).
    async fn send_blob(&self, blob: Vec<u8>) -> SendOutcome;

    /// True while the endpoint is considered unreachable; drains stop early.
    fn is_down(&self) -> bool;

    /// Upper bound on concurrently replayed blobs.
    fn max_concurrent_flushes(&self) -> usize;

    /// Budget for a single blob send (connect + request timeout).
    fn send_timeout(&self) -> Duration;
}

/// Aggregate outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries extracted from sealed files.
    pub entries: u64,
    /// Points accepted by the endpoint.
    pub success: u64,
    /// Points refused by the endpoint.
    pub failed: u64,
    /// Entries rejected as a whole and discarded.
    pub bad_content: u64,
    /// Entries written back to the current file after a failed send.
    pub requeued: u64,
    /// True when the drain stopped because connectivity went down.
    pub aborted: bool,
}
