use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tsship_client::ShipperOptions;

const DEFAULT_TICK_INTERVAL_MS: u64 = 10_000;

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Agent process settings
    #[serde(default)]
    pub(crate) agent: AgentConfig,
    /// Shipping pipeline settings; every field has a default
    #[serde(default)]
    pub(crate) shipper: ShipperOptions,
}

/// Agent process settings
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct AgentConfig {
    /// Value of the `host` tag on self metrics; defaults to $HOSTNAME
    pub(crate) host: Option<String>,
    /// Self-collection period in milliseconds
    pub(crate) tick_interval_ms: Option<u64>,
    /// Prometheus exporter, disabled when absent
    pub(crate) prometheus: Option<PrometheusConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PrometheusConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
}

/// Resolved configuration the agent runs with.
#[derive(Debug)]
pub(crate) struct ServiceConfiguration {
    pub(crate) host: String,
    pub(crate) tick_interval: Duration,
    pub(crate) prom_exporter: Option<SocketAddr>,
    pub(crate) shipper: ShipperOptions,
}

impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let host = config
            .agent
            .host
            .filter(|h| !h.trim().is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string());

        let tick_interval_ms = config
            .agent
            .tick_interval_ms
            .unwrap_or(DEFAULT_TICK_INTERVAL_MS);
        if tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("agent.tick_interval_ms must be greater than 0"));
        }

        let prom_exporter = match config.agent.prometheus {
            Some(prom) => {
                let addr = format!("{}:{}", prom.host, prom.port);
                Some(
                    addr.parse::<SocketAddr>()
                        .context(format!("Failed to parse into Socket address: {}", addr))?,
                )
            }
            None => None,
        };

        config
            .shipper
            .validate()
            .context("invalid shipper configuration")?;

        Ok(ServiceConfiguration {
            host,
            tick_interval: Duration::from_millis(tick_interval_ms),
            prom_exporter,
            shipper: config.shipper,
        })
    }
}
