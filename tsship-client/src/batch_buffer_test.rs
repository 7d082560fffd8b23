#[cfg(test)]
mod tests {
    use crate::batch_buffer::BatchBuffer;
    use std::sync::Arc;
    use std::time::Duration;
    use tsship_core::{Datapoint, IdentityCache};

    fn point(cache: &IdentityCache, host: &str, ts: i64, value: f64) -> Datapoint {
        let id = cache.intern("cpu.load", [("host", host)]).unwrap();
        Datapoint::new(id, ts, value).unwrap()
    }

    /// Test: example scenario at threshold 1
    ///
    /// Expected
    /// - One push yields a batch holding exactly one JSON object with the recorded fields
    #[test]
    fn test_threshold_one_yields_single_object() {
        let cache = IdentityCache::default();
        let buffer = BatchBuffer::new(1, Duration::from_secs(60));

        let batch = buffer.push(&point(&cache, "h1", 1000, 0.42)).expect("batch");
        assert_eq!(batch.points, 1);

        let parsed: serde_json::Value = serde_json::from_slice(&batch.body).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([{
                "metric": "cpu.load",
                "timestamp": 1000,
                "value": 0.42,
                "tags": {"host": "h1"}
            }])
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_size_threshold_and_swap() {
        let cache = IdentityCache::default();
        let buffer = BatchBuffer::new(3, Duration::from_secs(60));

        assert!(buffer.push(&point(&cache, "a", 1, 1.0)).is_none());
        assert!(buffer.push(&point(&cache, "b", 2, 2.0)).is_none());
        let batch = buffer.push(&point(&cache, "c", 3, 3.0)).expect("full batch");
        assert_eq!(batch.points, 3);
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&batch.body).unwrap();
        let hosts: Vec<&str> = parsed
            .iter()
            .map(|p| p["tags"]["host"].as_str().unwrap())
            .collect();
        assert_eq!(hosts, vec!["a", "b", "c"]);

        // fresh buffer after the swap
        assert_eq!(buffer.len(), 0);
        assert!(buffer.push(&point(&cache, "d", 4, 4.0)).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_take_and_age() {
        let cache = IdentityCache::default();
        let buffer = BatchBuffer::new(100, Duration::from_millis(20));

        assert!(buffer.take().is_none());
        assert!(buffer.take_if_aged().is_none());

        buffer.push(&point(&cache, "a", 1, 1.0));
        assert!(buffer.take_if_aged().is_none());
        std::thread::sleep(Duration::from_millis(30));
        let aged = buffer.take_if_aged().expect("aged batch");
        assert_eq!(aged.points, 1);

        buffer.push(&point(&cache, "b", 2, 2.0));
        let taken = buffer.take().expect("forced batch");
        assert_eq!(taken.points, 1);
        assert!(buffer.take().is_none());
    }

    /// Test: concurrent producers lose nothing
    #[test]
    fn test_concurrent_pushes() {
        let cache = Arc::new(IdentityCache::default());
        let buffer = Arc::new(BatchBuffer::new(50, Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    let mut flushed = Vec::new();
                    for i in 0..100 {
                        let dp = point(&cache, &format!("t{}", t), i, i as f64);
                        if let Some(batch) = buffer.push(&dp) {
                            flushed.push(batch);
                        }
                    }
                    flushed
                })
            })
            .collect();

        let mut total = 0;
        for h in handles {
            for batch in h.join().unwrap() {
                let parsed: Vec<serde_json::Value> = serde_json::from_slice(&batch.body).unwrap();
                assert_eq!(parsed.len(), batch.points);
                total += batch.points;
            }
        }
        total += buffer.take().map_or(0, |b| b.points);
        assert_eq!(total, 400);
    }
}
