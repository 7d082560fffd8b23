use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::errors::{IdentityError, Result};
use crate::identity::{content_hash, normalize, MetricIdentity};

/// Bounds for the identity cache. Both unset means unbounded for the process lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityCacheConfig {
    pub max_capacity: Option<u64>,
    pub time_to_idle_ms: Option<u64>,
}

/// Interns metric identities by content hash.
///
/// Structurally equal (name, tags) pairs always resolve to the same `Arc`; `get_with`
/// runs at most one initializer per key even when several producers race on it.
#[derive(Clone)]
pub struct IdentityCache {
    cache: Cache<u64, Arc<MetricIdentity>>,
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(IdentityCacheConfig::default())
    }
}

impl IdentityCache {
    pub fn new(cfg: IdentityCacheConfig) -> Self {
        let mut builder = Cache::builder().eviction_listener(|hash: Arc<u64>, identity: Arc<MetricIdentity>, cause| {
            debug!(target = "identity_cache", hash = *hash, identity = %identity, cause = ?cause, "evicted metric identity");
        });
        if let Some(max) = cfg.max_capacity {
            builder = builder.max_capacity(max);
        }
        if let Some(tti) = cfg.time_to_idle_ms {
            builder = builder.time_to_idle(Duration::from_millis(tti));
        }
        Self {
            cache: builder.build(),
        }
    }

    /// Get or create the shared identity for `(name, tags)`.
    ///
    /// Fails on invalid input, or when a different identity already owns the same content
    /// hash; the two are never merged.
    pub fn intern<I, K, V>(&self, name: &str, tags: I) -> Result<Arc<MetricIdentity>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let (name, tags) = normalize(name, tags)?;
        let hash = content_hash(&name, &tags);

        let identity = self.cache.get_with(hash, || {
            Arc::new(MetricIdentity::from_normalized(
                name.clone(),
                tags.clone(),
                hash,
            ))
        });

        if !identity.matches(&name, &tags) {
            let requested = MetricIdentity::from_normalized(name, tags, hash);
            error!(target = "identity_cache", hash, existing = %identity, requested = %requested, "metric identity hash collision");
            return Err(IdentityError::HashCollision {
                hash,
                existing: identity.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(identity)
    }

    /// Look up an already interned identity by its content hash.
    pub fn get(&self, hash: u64) -> Option<Arc<MetricIdentity>> {
        self.cache.get(&hash)
    }

    /// Number of interned identities, after applying pending evictions.
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }
}
