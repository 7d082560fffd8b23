use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use tsship_client::shipper_metrics;
use tsship_persistent_storage::persistent_metrics;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Metric {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

pub(crate) const COUNTERS: [Metric; 1] = [AGENT_TICKS_TOTAL];
pub(crate) const GAUGES: [Metric; 1] = [AGENT_UPTIME_SECONDS];

// AGENT Metrics --------------------------

pub(crate) const AGENT_TICKS_TOTAL: Metric = Metric {
    name: "tsship_agent_ticks_total",
    description: "Total number of self-collection ticks",
};

pub(crate) const AGENT_UPTIME_SECONDS: Metric = Metric {
    name: "tsship_agent_uptime_seconds",
    description: "Seconds since the agent started",
};

/// Install the Prometheus exporter (when an address is given) and describe every metric the
/// agent and its libraries emit.
pub(crate) fn init_metrics(prom_addr: Option<SocketAddr>, host: &str) -> Result<()> {
    info!(target = "agent", "initializing metrics exporter");

    if let Some(addr) = prom_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("host", host.to_string())
            .install()
            .context(format!("failed to install Prometheus exporter on {}", addr))?;
        info!(target = "agent", %addr, "prometheus exporter listening");
    }

    for metric in COUNTERS {
        register_counter(metric.name, metric.description);
    }
    for metric in GAUGES {
        register_gauge(metric.name, metric.description);
    }

    for metric in shipper_metrics::COUNTERS {
        register_counter(metric.name, metric.description);
    }
    for metric in shipper_metrics::GAUGES {
        register_gauge(metric.name, metric.description);
    }
    for metric in shipper_metrics::HISTOGRAMS {
        register_histogram(metric.name, metric.description);
    }

    for metric in persistent_metrics::COUNTERS {
        register_counter(metric.name, metric.description);
    }
    for metric in persistent_metrics::GAUGES {
        register_gauge(metric.name, metric.description);
    }

    Ok(())
}

fn register_counter(name: &'static str, description: &'static str) {
    metrics::describe_counter!(name, description);
    let _counter = metrics::counter!(name);
}

fn register_gauge(name: &'static str, description: &'static str) {
    metrics::describe_gauge!(name, description);
    let _gauge = metrics::gauge!(name);
}

fn register_histogram(name: &'static str, description: &'static str) {
    metrics::describe_histogram!(name, description);
    let _histogram = metrics::histogram!(name);
}
