use serde::{Deserialize, Serialize};
use std::time::Duration;
use tsship_core::{IdentityCacheConfig, TimestampUnit};
use tsship_persistent_storage::PersistenceConfig;

use crate::errors::{Result, ShipperError};
use crate::response_handler::ResponseMode;

/// Everything the shipping pipeline needs to know about the ingestion endpoint and itself.
///
/// Durations are plain milliseconds so the same struct reads straight from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipperOptions {
    /// Base URL of the ingestion endpoint, e.g. `http://tsdb:4242`.
    pub endpoint: String,
    /// Path datapoints are POSTed to.
    pub put_path: String,
    /// Path the connectivity probe GETs.
    pub version_path: String,

    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,

    pub probe_connect_timeout_ms: u64,
    pub probe_request_timeout_ms: u64,
    pub probe_period_ms: u64,

    /// Extra attempts after the first failed send.
    pub retry_count: usize,
    pub retry_delay_ms: u64,

    /// Flush the batch buffer once it holds this many points.
    pub batch_size: usize,
    /// Flush the batch buffer once its oldest point is this old.
    pub batch_time_ms: u64,

    pub compression: bool,
    pub max_concurrent_flushes: usize,
    pub response_mode: ResponseMode,

    pub persistence_enabled: bool,
    pub persistence: PersistenceConfig,
    /// Periodic drain of the offline backlog while connected, on top of the reconnect drain.
    pub drain_interval_ms: Option<u64>,

    pub timestamp_unit: TimestampUnit,
    pub identity_cache: IdentityCacheConfig,
}

impl Default for ShipperOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:4242".to_string(),
            put_path: "/api/put".to_string(),
            version_path: "/api/version".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            probe_connect_timeout_ms: 2_000,
            probe_request_timeout_ms: 5_000,
            probe_period_ms: 15_000,
            retry_count: 2,
            retry_delay_ms: 500,
            batch_size: 200,
            batch_time_ms: 5_000,
            compression: true,
            max_concurrent_flushes: 4,
            response_mode: ResponseMode::Summary,
            persistence_enabled: true,
            persistence: PersistenceConfig::default(),
            drain_interval_ms: None,
            timestamp_unit: TimestampUnit::default(),
            identity_cache: IdentityCacheConfig::default(),
        }
    }
}

impl ShipperOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Budget for one send attempt end to end.
    pub fn send_timeout(&self) -> Duration {
        self.connect_timeout() + self.request_timeout()
    }

    pub fn probe_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_connect_timeout_ms)
    }

    pub fn probe_request_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_request_timeout_ms)
    }

    pub fn probe_period(&self) -> Duration {
        Duration::from_millis(self.probe_period_ms.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn batch_time(&self) -> Duration {
        Duration::from_millis(self.batch_time_ms.max(1))
    }

    pub fn drain_interval(&self) -> Option<Duration> {
        self.drain_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Data submission URL; the response mode picks the query the endpoint answers to.
    pub fn put_url(&self) -> Result<reqwest::Url> {
        let mut url = self.join(&self.put_path)?;
        match self.response_mode {
            ResponseMode::Ignore => {}
            ResponseMode::Summary => url.set_query(Some("summary")),
            ResponseMode::Detailed => url.set_query(Some("details")),
        }
        Ok(url)
    }

    pub fn version_url(&self) -> Result<reqwest::Url> {
        self.join(&self.version_path)
    }

    fn join(&self, path: &str) -> Result<reqwest::Url> {
        let base = reqwest::Url::parse(&self.endpoint).map_err(|e| ShipperError::InvalidEndpoint {
            url: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ShipperError::InvalidEndpoint {
                url: self.endpoint.clone(),
                reason: format!("unsupported scheme '{}'", base.scheme()),
            });
        }
        base.join(path).map_err(|e| ShipperError::InvalidEndpoint {
            url: format!("{}{}", self.endpoint, path),
            reason: e.to_string(),
        })
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.put_url()?;
        self.version_url()?;
        if self.batch_size == 0 {
            return Err(ShipperError::InvalidOptions(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_flushes == 0 {
            return Err(ShipperError::InvalidOptions(
                "max_concurrent_flushes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
