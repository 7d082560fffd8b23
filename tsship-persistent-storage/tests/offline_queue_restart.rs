use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tsship_core::{OfflineSink, SendOutcome};
use tsship_persistent_storage::compression::decompress;
use tsship_persistent_storage::offline_file::{file_name, OfflineFile};
use tsship_persistent_storage::{PersistenceConfig, PersistenceManager};

// This test module validates the offline queue across process restarts.
// Why: the agent can die at any point of a drain. Whatever was appended and not yet delivered
// must survive: sealed files, entries parked in flight, and files mid-compaction.
// Expected: after a crash and restart every undelivered blob is replayed exactly once and the
// storage directory ends up empty of data files.

#[derive(Default)]
struct CollectingSink {
    sent: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl OfflineSink for CollectingSink {
    async fn send_blob(&self, blob: Vec<u8>) -> SendOutcome {
        self.sent.lock().await.push(decompress(&blob).expect("gzip entry"));
        SendOutcome::Delivered {
            success: 1,
            failed: 0,
        }
    }

    fn is_down(&self) -> bool {
        false
    }

    fn max_concurrent_flushes(&self) -> usize {
        1
    }

    fn send_timeout(&self) -> Duration {
        Duration::from_secs(2)
    }
}

fn blob(i: usize) -> Vec<u8> {
    format!(r#"[{{"metric":"restart","timestamp":{},"value":{},"tags":{{}}}}]"#, i, i).into_bytes()
}

fn cfg(dir: &std::path::Path) -> PersistenceConfig {
    PersistenceConfig {
        dir: dir.to_path_buf(),
        max_file_size: 1024 * 1024,
        ..Default::default()
    }
}

#[tokio::test]
/// What this test validates
///
/// - Scenario: the agent buffers 6 blobs offline, then dies without a clean shutdown. At the
///   moment of death one entry had been extracted for replay but not sent, and a compaction
///   temp file was left next to the data file.
/// - Expectations:
///   - Restart succeeds (the OS released the directory lock with the process).
///   - The stale compaction file is removed.
///   - The parked entry is re-queued behind the surviving entries.
///   - A drain delivers all 6 blobs once.
async fn restart_after_crash_replays_everything() {
    let tmp = tempfile::tempdir().unwrap();

    {
        let pm = PersistenceManager::open(cfg(tmp.path())).await.expect("open");
        for i in 0..6 {
            pm.offline(blob(i)).await.expect("offline");
        }
        // crash: no shutdown
    }

    // Simulate a drain that parked entry 0 and then died.
    {
        let path = tmp.path().join(file_name(0));
        let file = OfflineFile::open(path.clone(), 0).await.expect("reopen data file");
        let parked = file
            .extract(1, &tmp.path().join("inflight"))
            .await
            .expect("extract");
        assert_eq!(parked.len(), 1);
        tokio::fs::write(tmp.path().join(format!("{}.compact", file_name(0))), b"junk")
            .await
            .unwrap();
    }

    let pm = PersistenceManager::open(cfg(tmp.path())).await.expect("restart");
    assert!(!tmp
        .path()
        .join(format!("{}.compact", file_name(0)))
        .exists());
    assert_eq!(pm.pending_entries(), 6);

    let sink = Arc::new(CollectingSink::default());
    let report = pm.flush_to_server(sink.clone()).await;
    assert_eq!(report.success, 6);

    let sent = sink.sent.lock().await.clone();
    let mut expected: Vec<Vec<u8>> = (1..6).map(blob).collect();
    expected.push(blob(0));
    assert_eq!(sent, expected);

    pm.shutdown().await;
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".dat"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
/// What this test validates
///
/// - Scenario: a clean shutdown with data still queued, then a restart.
/// - Expectations: queued data survives; new files continue the numbering instead of
///   overwriting existing ones.
async fn clean_restart_keeps_queue_and_numbering() {
    let tmp = tempfile::tempdir().unwrap();

    let pm = PersistenceManager::open(cfg(tmp.path())).await.expect("open");
    pm.offline(blob(0)).await.unwrap();
    pm.roll().await;
    pm.offline(blob(1)).await.unwrap();
    pm.shutdown().await;
    drop(pm);

    let pm = PersistenceManager::open(cfg(tmp.path())).await.expect("reopen");
    assert_eq!(pm.file_count(), 2);
    assert_eq!(pm.pending_entries(), 2);
    pm.offline(blob(2)).await.unwrap();
    assert!(tmp.path().join(file_name(2)).exists());

    let sink = Arc::new(CollectingSink::default());
    pm.flush_to_server(sink.clone()).await;
    assert_eq!(*sink.sent.lock().await, vec![blob(0), blob(1), blob(2)]);
    pm.shutdown().await;
}
