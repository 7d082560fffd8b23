mod agent_metrics;
mod args_parse;
mod self_collector;
mod service_configuration;

#[cfg(test)]
mod service_configuration_test;

use std::{
    fs::read_to_string,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    agent_metrics::init_metrics,
    args_parse::Args,
    self_collector::SelfCollector,
    service_configuration::{LoadConfiguration, ServiceConfiguration},
};

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tsship_client::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse command line arguments
    let args = Args::parse()?;

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))
        .context(format!("Failed to read config file: {}", args.config_file))?;
    let load_config: LoadConfiguration = serde_yaml::from_str(&config_content)?;

    // Attempt to transform LoadConfiguration into ServiceConfiguration
    let mut service_config: ServiceConfiguration = load_config.try_into()?;

    // If `endpoint` is provided via command-line args, override the value from the config file
    if let Some(endpoint) = args.endpoint {
        service_config.shipper.endpoint = endpoint;
    }

    // If `storage_dir` is provided via command-line args, override the value from the config file
    if let Some(storage_dir) = args.storage_dir {
        service_config.shipper.persistence.dir = PathBuf::from(storage_dir);
    }

    // If `prom_exporter` is provided via command-line args, override the value from the config file
    if let Some(prom_exporter) = args.prom_exporter {
        let prom_address: SocketAddr = prom_exporter.parse().context(format!(
            "Failed to parse into Socket address: {}",
            prom_exporter
        ))?;
        service_config.prom_exporter = Some(prom_address);
    }

    service_config
        .shipper
        .validate()
        .context("invalid shipper configuration after command-line overrides")?;

    // Init metrics with or without prometheus exporter
    init_metrics(service_config.prom_exporter, &service_config.host)?;

    info!(
        target = "agent",
        endpoint = %service_config.shipper.endpoint,
        storage = %service_config.shipper.persistence.dir.display(),
        persistence = service_config.shipper.persistence_enabled,
        "starting tsship agent"
    );
    let pipeline = Arc::new(Pipeline::start(service_config.shipper).await?);

    let collector = Arc::new(SelfCollector::new(pipeline.clone(), &service_config.host)?);
    let collector_task = collector.start(service_config.tick_interval);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!(target = "agent", "shutdown signal received");

    collector_task.abort();
    pipeline.shutdown().await;

    let stats = pipeline.stats();
    info!(
        target = "agent",
        sent = stats.shipper.sent_batches,
        buffered = stats.shipper.buffered_batches,
        dropped = stats.shipper.dropped_batches,
        pending_offline = stats.pending_offline_entries,
        "tsship agent stopped"
    );
    Ok(())
}
