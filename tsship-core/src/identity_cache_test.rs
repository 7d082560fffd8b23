#[cfg(test)]
mod tests {
    use crate::identity_cache::{IdentityCache, IdentityCacheConfig};
    use std::collections::HashMap;
    use std::sync::{Arc, Barrier};

    /// Test: interning returns one shared instance
    ///
    /// Purpose
    /// - Structurally equal (name, tags), including reordered tag insertion, must map to the
    ///   same `Arc` and the same content hash
    ///
    /// Expected
    /// - `Arc::ptr_eq` holds and the cache holds a single entry
    #[test]
    fn test_intern_same_instance() {
        let cache = IdentityCache::default();

        let a = cache
            .intern("cpu.load", vec![("host", "h1"), ("dc", "eu")])
            .unwrap();
        let mut tags = HashMap::new();
        tags.insert("dc".to_string(), "eu".to_string());
        tags.insert("host".to_string(), " h1 ".to_string());
        let b = cache.intern("cpu.load", tags).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(a.content_hash()).is_some());
    }

    #[test]
    fn test_intern_distinct_identities() {
        let cache = IdentityCache::default();
        let a = cache.intern("cpu.load", vec![("host", "h1")]).unwrap();
        let b = cache.intern("cpu.load", vec![("host", "h2")]).unwrap();
        let c = cache.intern("mem.used", vec![("host", "h1")]).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_intern_rejects_invalid_input() {
        let cache = IdentityCache::default();
        assert!(cache.intern("", vec![("host", "h1")]).is_err());
        assert!(cache.is_empty());
    }

    /// Test: concurrent get-or-create
    ///
    /// Purpose
    /// - Many threads interning the same identity at once must all observe one instance
    ///
    /// Flow
    /// - 16 threads released by a barrier intern the same (name, tags)
    ///
    /// Expected
    /// - Every returned `Arc` is pointer-equal to the first
    #[test]
    fn test_concurrent_intern_single_instance() {
        let cache = IdentityCache::default();
        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .intern("gc.pause", vec![("collector", "g1"), ("host", "h1")])
                        .unwrap()
                })
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for id in &ids[1..] {
            assert!(Arc::ptr_eq(&ids[0], id));
        }
        assert_eq!(cache.len(), 1);
    }

    /// Test: bounded cache evicts and drops identities
    ///
    /// Expected
    /// - After interning more identities than capacity, the cache settles at or below capacity
    #[test]
    fn test_bounded_cache_evicts() {
        let cache = IdentityCache::new(IdentityCacheConfig {
            max_capacity: Some(8),
            time_to_idle_ms: None,
        });
        for i in 0..64 {
            cache
                .intern("series", vec![("idx", i.to_string())])
                .unwrap();
        }
        assert!(cache.len() <= 8);

        cache.invalidate_all();
        assert_eq!(cache.len(), 0);
    }
}
