use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tsship_core::{DrainReport, OfflineSink, SendOutcome};

use crate::compression;
use crate::dir_lock::DirLock;
use crate::errors::{PersistentStorageError, Result};
use crate::offline_file::{
    parse_index, ExtractedEntry, OfflineFile, COMPACT_SUFFIX, ENTRY_SUFFIX, FILE_PREFIX,
};
use crate::persistent_metrics::{
    OFFLINE_DRAIN_ENTRIES_TOTAL, OFFLINE_FILE_DISCARD_TOTAL, OFFLINE_FILE_ROLL_TOTAL,
    OFFLINE_PENDING_ENTRIES, OFFLINE_WRITE_BYTES_TOTAL, OFFLINE_WRITE_ERRORS_TOTAL,
    OFFLINE_WRITE_TOTAL,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Storage directory holding `offlinemetrics<N>.dat` files and the lock file.
    pub dir: PathBuf,
    /// Roll to a new file before an append would push the current one past this size.
    pub max_file_size: u64,
    /// Subdirectory (of `dir`) where extracted entries wait while being replayed.
    pub inflight_dir_name: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./offline"),
            max_file_size: 64 * 1024 * 1024, // 64 MiB
            inflight_dir_name: "inflight".to_string(),
        }
    }
}

/// Owns the offline files of one storage directory.
///
/// Responsibilities
/// - Append blobs to the current file, rolling to a new file before it would overflow.
/// - Hold the directory lock so no second agent writes the same files.
/// - Recover on startup: discard truncated files, resume numbering, re-queue entries that
///   were mid-replay when the process died.
/// - Drain sealed files, oldest first, through an `OfflineSink` with bounded concurrency.
#[derive(Debug)]
pub struct PersistenceManager {
    cfg: PersistenceConfig,
    inflight_dir: PathBuf,
    // file-handle cache: index -> file (current and sealed)
    files: DashMap<u64, Arc<OfflineFile>>,
    current: Mutex<Option<Arc<OfflineFile>>>,
    next_index: AtomicU64,
    draining: AtomicBool,
    // set by `stop_draining`/`shutdown`; a running drain stops extracting
    stopping: AtomicBool,
    lock: Mutex<DirLock>,
}

impl PersistenceManager {
    /// Lock the storage directory and recover whatever a previous run left behind.
    ///
    /// Fails fast with `Locked` when another instance holds the directory.
    pub async fn open(cfg: PersistenceConfig) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&cfg.dir).await?;
        let lock = DirLock::acquire(&cfg.dir)?;
        let inflight_dir = cfg.dir.join(&cfg.inflight_dir_name);
        tokio::fs::create_dir_all(&inflight_dir).await?;

        let manager = Arc::new(Self {
            inflight_dir,
            files: DashMap::new(),
            current: Mutex::new(None),
            next_index: AtomicU64::new(0),
            draining: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            lock: Mutex::new(lock),
            cfg,
        });
        manager.recover_files().await?;
        manager.requeue_orphan_entries().await?;

        info!(
            target = "persistence",
            dir = %manager.cfg.dir.display(),
            max_file_size = manager.cfg.max_file_size,
            files = manager.files.len(),
            pending_entries = manager.pending_entries(),
            next_index = manager.next_index.load(Ordering::Acquire),
            "persistence manager ready"
        );
        Ok(manager)
    }

    async fn recover_files(&self) -> Result<()> {
        let mut highest: Option<u64> = None;
        let mut rd = tokio::fs::read_dir(&self.cfg.dir).await?;
        while let Some(dent) = rd.next_entry().await? {
            let name = dent.file_name().to_string_lossy().into_owned();
            let path = dent.path();

            if name.ends_with(COMPACT_SUFFIX) {
                // a compaction that never got renamed; the original is still intact
                debug!(target = "persistence", file = %path.display(), "removing stale compaction file");
                remove_if_exists(&path).await?;
                continue;
            }
            let Some(index) = parse_index(&name) else {
                continue;
            };

            match OfflineFile::open(path.clone(), index).await {
                Ok(file) => {
                    highest = Some(highest.map_or(index, |h| h.max(index)));
                    self.files.insert(index, Arc::new(file));
                }
                Err(e @ PersistentStorageError::Truncated { .. })
                | Err(e @ PersistentStorageError::Corrupt { .. }) => {
                    warn!(target = "persistence", file = %path.display(), error = %e, "discarding unusable offline file");
                    metrics::counter!(OFFLINE_FILE_DISCARD_TOTAL.name).increment(1);
                    remove_if_exists(&path).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let next = highest.map_or(0, |h| h + 1);
        self.next_index.store(next, Ordering::Release);
        self.update_pending_gauge();
        Ok(())
    }

    /// Move entries parked in the inflight directory back into the current file, oldest first.
    async fn requeue_orphan_entries(&self) -> Result<()> {
        let mut orphans: Vec<((u64, u64), PathBuf)> = Vec::new();
        let mut rd = tokio::fs::read_dir(&self.inflight_dir).await?;
        while let Some(dent) = rd.next_entry().await? {
            let name = dent.file_name().to_string_lossy().into_owned();
            if let Some(key) = parse_entry_name(&name) {
                orphans.push((key, dent.path()));
            }
        }
        if orphans.is_empty() {
            return Ok(());
        }
        orphans.sort();

        info!(target = "persistence", count = orphans.len(), "re-queuing entries left in flight");
        for (_, path) in orphans {
            let blob = tokio::fs::read(&path).await?;
            self.offline(blob).await?;
            remove_if_exists(&path).await?;
        }
        Ok(())
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.cfg
    }

    pub fn dir(&self) -> &Path {
        &self.cfg.dir
    }

    /// Append one blob to the current file, rolling first if it would overflow.
    ///
    /// Any I/O failure is returned to the caller, which decides whether the blob is dropped.
    pub async fn offline(&self, blob: Vec<u8>) -> Result<u64> {
        let payload = compression::ensure_compressed(blob)?;
        let payload_len = payload.len();

        let file = {
            let mut current = self.current.lock().await;
            match current.as_ref() {
                Some(f) if !f.would_overflow(payload_len, self.cfg.max_file_size) => f.clone(),
                Some(f) => {
                    debug!(target = "persistence", file = %f.path().display(), size = f.size(), "rolling offline file on size");
                    metrics::counter!(OFFLINE_FILE_ROLL_TOTAL.name, "reason" => "size").increment(1);
                    let f = self.new_file().await?;
                    *current = Some(f.clone());
                    f
                }
                None => {
                    let f = self.new_file().await?;
                    *current = Some(f.clone());
                    f
                }
            }
        };

        match file.write(payload).await {
            Ok(size) => {
                metrics::counter!(OFFLINE_WRITE_TOTAL.name).increment(1);
                metrics::counter!(OFFLINE_WRITE_BYTES_TOTAL.name).increment(payload_len as u64);
                self.update_pending_gauge();
                Ok(size)
            }
            Err(e) => {
                metrics::counter!(OFFLINE_WRITE_ERRORS_TOTAL.name).increment(1);
                error!(target = "persistence", file = %file.path().display(), error = %e, "offline append failed");
                Err(e)
            }
        }
    }

    async fn new_file(&self) -> Result<Arc<OfflineFile>> {
        let index = self.next_index.fetch_add(1, Ordering::AcqRel);
        let file = Arc::new(OfflineFile::create(&self.cfg.dir, index).await?);
        self.files.insert(index, file.clone());
        Ok(file)
    }

    /// Seal the current file; the next append opens a fresh one.
    pub async fn roll(&self) {
        let mut current = self.current.lock().await;
        if let Some(f) = current.take() {
            debug!(target = "persistence", file = %f.path().display(), entries = f.entry_count(), "sealed offline file");
            metrics::counter!(OFFLINE_FILE_ROLL_TOTAL.name, "reason" => "manual").increment(1);
        }
    }

    /// Entries waiting across all files, current included.
    pub fn pending_entries(&self) -> u64 {
        self.files
            .iter()
            .map(|f| f.entry_count().max(0) as u64)
            .sum()
    }

    /// Number of offline files currently on disk (current included).
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Make a running drain stop extracting entries. Entries already handed to the sink
    /// finish or are re-queued; later drains are refused.
    pub fn stop_draining(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    fn should_stop(&self, sink: &dyn OfflineSink) -> bool {
        self.stopping.load(Ordering::Acquire) || sink.is_down()
    }

    /// Replay every sealed file through `sink`, oldest file first, one entry at a time.
    ///
    /// The current file is rolled first so concurrent appends never race the drain. At most
    /// `sink.max_concurrent_flushes()` entries are in flight. Stops early once the sink reports
    /// itself down. Only one drain runs at a time; a concurrent call returns an empty report.
    pub async fn flush_to_server(self: &Arc<Self>, sink: Arc<dyn OfflineSink>) -> DrainReport {
        if self.stopping.load(Ordering::Acquire) {
            return DrainReport::default();
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(target = "persistence", "drain already in progress; skipping");
            return DrainReport::default();
        }
        let _guard = DrainGuard(&self.draining);

        // roll and snapshot under one lock: every file in the snapshot is sealed
        let mut sealed: Vec<Arc<OfflineFile>> = {
            let mut current = self.current.lock().await;
            if let Some(f) = current.take() {
                debug!(target = "persistence", file = %f.path().display(), entries = f.entry_count(), "sealed offline file for drain");
                metrics::counter!(OFFLINE_FILE_ROLL_TOTAL.name, "reason" => "drain").increment(1);
            }
            self.files.iter().map(|f| f.value().clone()).collect()
        };
        sealed.sort_by_key(|f| f.index());

        let concurrency = sink.max_concurrent_flushes().max(1);
        let per_send = sink.send_timeout();
        let wait_budget = per_send * concurrency as u32;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut report = DrainReport::default();

        info!(target = "persistence", files = sealed.len(), pending_entries = self.pending_entries(), concurrency, "draining offline files");
        for file in sealed {
            let mut tasks: JoinSet<EntryOutcome> = JoinSet::new();
            loop {
                if self.should_stop(sink.as_ref()) {
                    report.aborted = true;
                    break;
                }
                if file.entry_count() <= 0 {
                    break;
                }
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                // an in-flight send may have taken the endpoint down while we waited
                if self.should_stop(sink.as_ref()) {
                    report.aborted = true;
                    break;
                }
                let entry = match file.extract(1, &self.inflight_dir).await {
                    Ok(mut extracted) => match extracted.pop() {
                        Some(entry) => entry,
                        None => break,
                    },
                    Err(e) => {
                        error!(target = "persistence", file = %file.path().display(), error = %e, "extracting offline entry failed");
                        break;
                    }
                };
                report.entries += 1;

                let manager = Arc::clone(self);
                let sink = Arc::clone(&sink);
                tasks.spawn(async move {
                    let _permit = permit;
                    manager.replay_entry(sink.as_ref(), entry, per_send).await
                });

                while let Some(done) = tasks.try_join_next() {
                    apply_outcome(&mut report, done);
                }
            }

            let deadline = Instant::now() + wait_budget;
            loop {
                match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(Some(done)) => apply_outcome(&mut report, done),
                    Ok(None) => break,
                    Err(_) => {
                        warn!(target = "persistence", file = %file.path().display(), in_flight = tasks.len(), "timed out waiting for in-flight sends; leaving them to finish on their own");
                        tasks.detach_all();
                        report.aborted = true;
                        break;
                    }
                }
            }

            if file.entry_count() <= 0 {
                if let Err(e) = file.delete().await {
                    warn!(target = "persistence", file = %file.path().display(), error = %e, "failed to delete drained offline file");
                } else {
                    self.files.remove(&file.index());
                }
            }
            if report.aborted {
                break;
            }
        }

        self.update_pending_gauge();
        info!(
            target = "persistence",
            entries = report.entries,
            success = report.success,
            failed = report.failed,
            bad_content = report.bad_content,
            requeued = report.requeued,
            aborted = report.aborted,
            "offline drain finished"
        );
        report
    }

    async fn replay_entry(
        &self,
        sink: &dyn OfflineSink,
        entry: ExtractedEntry,
        per_send: Duration,
    ) -> EntryOutcome {
        let blob = match entry.read().await {
            Ok(blob) => blob,
            Err(e) => {
                error!(target = "persistence", entry = %entry.path.display(), error = %e, "cannot read extracted entry; dropping it");
                return EntryOutcome::Lost;
            }
        };

        let outcome = match tokio::time::timeout(per_send, sink.send_blob(blob.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(target = "persistence", entry = %entry.path.display(), "replay send timed out");
                SendOutcome::Failed
            }
        };

        let result = match outcome {
            SendOutcome::Delivered { success, failed } => {
                metrics::counter!(OFFLINE_DRAIN_ENTRIES_TOTAL.name, "result" => "delivered").increment(1);
                EntryOutcome::Delivered { success, failed }
            }
            SendOutcome::Rejected { failed } => {
                metrics::counter!(OFFLINE_DRAIN_ENTRIES_TOTAL.name, "result" => "rejected").increment(1);
                warn!(target = "persistence", entry = %entry.path.display(), failed, "endpoint rejected replayed entry; discarding it");
                EntryOutcome::Rejected { failed }
            }
            SendOutcome::Failed => match self.offline(blob).await {
                Ok(_) => {
                    metrics::counter!(OFFLINE_DRAIN_ENTRIES_TOTAL.name, "result" => "requeued").increment(1);
                    EntryOutcome::Requeued
                }
                Err(e) => {
                    // keep the parked file; the next startup re-queues it
                    error!(target = "persistence", entry = %entry.path.display(), error = %e, "failed to re-queue entry after a failed send");
                    return EntryOutcome::Lost;
                }
            },
        };

        if let Err(e) = entry.remove().await {
            warn!(target = "persistence", entry = %entry.path.display(), error = %e, "failed to remove extracted entry");
        }
        result
    }

    /// Stop draining, put parked entries back into the current file, purge compaction
    /// scratch files and release the directory lock.
    ///
    /// A drain task aborted mid-replay leaves its extracted entries in the inflight
    /// directory; they are undelivered and go back into the queue here. Whatever cannot be
    /// re-queued stays parked for the next startup.
    pub async fn shutdown(&self) {
        self.stop_draining();
        if let Err(e) = self.requeue_orphan_entries().await {
            error!(target = "persistence", dir = %self.inflight_dir.display(), error = %e, "failed to re-queue parked entries; leaving them for the next start");
        }
        if let Err(e) = self.purge_compaction_files().await {
            warn!(target = "persistence", dir = %self.cfg.dir.display(), error = %e, "failed to purge compaction files");
        }
        self.lock.lock().await.release();
        info!(target = "persistence", dir = %self.cfg.dir.display(), pending_entries = self.pending_entries(), "persistence manager shut down");
    }

    async fn purge_compaction_files(&self) -> Result<()> {
        let mut purged = 0usize;
        let mut rd = tokio::fs::read_dir(&self.cfg.dir).await?;
        while let Some(dent) = rd.next_entry().await? {
            if dent.file_name().to_string_lossy().ends_with(COMPACT_SUFFIX) {
                remove_if_exists(&dent.path()).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(target = "persistence", purged, "purged compaction files on shutdown");
        }
        Ok(())
    }

    fn update_pending_gauge(&self) {
        metrics::gauge!(OFFLINE_PENDING_ENTRIES.name).set(self.pending_entries() as f64);
    }
}

#[derive(Debug)]
enum EntryOutcome {
    Delivered { success: u64, failed: u64 },
    Rejected { failed: u64 },
    Requeued,
    Lost,
}

fn apply_outcome(
    report: &mut DrainReport,
    done: std::result::Result<EntryOutcome, tokio::task::JoinError>,
) {
    match done {
        Ok(EntryOutcome::Delivered { success, failed }) => {
            report.success += success;
            report.failed += failed;
        }
        Ok(EntryOutcome::Rejected { failed }) => {
            report.bad_content += 1;
            report.failed += failed;
        }
        Ok(EntryOutcome::Requeued) => report.requeued += 1,
        Ok(EntryOutcome::Lost) => {}
        Err(e) => warn!(target = "persistence", error = %e, "replay task failed"),
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// `offlinemetrics<N>-<seq>.entry` -> `(N, seq)`
fn parse_entry_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(ENTRY_SUFFIX)?;
    let (index, seq) = stem.split_once('-')?;
    Some((index.parse().ok()?, seq.parse().ok()?))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
