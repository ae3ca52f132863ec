//! Sonar Binary Entry Point
//!
//! This binary runs the complete testbed telemetry collector.
//! Core functionality is provided by the `sonar` library crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sonar::{
    collector::{CollectorRegistry, DEFAULT_SHUTDOWN_TIMEOUT},
    collector::flow::FlowCollector,
    collector::poller::{DevicePoller, PolledDevice},
    collector::trap::TrapCollector,
    config::AppConfig,
    rules::RuleEngine,
    sink::{SinkBuilder, SinkHandles},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sonar - Testbed Telemetry Collector
#[derive(Parser, Debug)]
#[command(name = "sonar", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "SONAR_CONFIG"
    )]
    config: String,

    /// Output directory for record files (overrides config file)
    #[arg(long, env = "SONAR_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Flow-export listen port (overrides config file)
    #[arg(long, env = "SONAR_FLOW_PORT")]
    flow_port: Option<u16>,

    /// Trap listen port (overrides config file)
    #[arg(long, env = "SONAR_TRAP_PORT")]
    trap_port: Option<u16>,

    /// Device poll interval, e.g. "5s" (overrides config file)
    #[arg(long, env = "SONAR_POLL_INTERVAL", value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sonar=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Sonar - Testbed Telemetry Collector");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(dir) = cli.output_dir {
        config.sink.dir = dir;
    }
    if let Some(port) = cli.flow_port {
        config.flow.port = port;
    }
    if let Some(port) = cli.trap_port {
        config.trap.port = port;
    }
    if let Some(interval) = cli.poll_interval {
        config.poller.interval = interval;
    }
    config.validate()?;

    tracing::info!(
        "Output: {}, Flow: {}, Trap: {}, Devices: {}",
        config.sink.dir.display(),
        config.flow.socket_addr(),
        config.trap.socket_addr(),
        config.devices.len(),
    );

    // Build record sink
    std::fs::create_dir_all(&config.sink.dir)?;
    let handles = SinkBuilder::new(&config.sink.dir)
        .paths(config.sink.stream_paths())
        .channel_capacity(config.sink.channel_capacity)
        .build()?;

    tracing::info!("Sink initialized");

    let rules = Arc::new(RuleEngine::new(config.rules.clone()));
    let registry = CollectorRegistry::new();

    if config.flow.enabled {
        let flow =
            FlowCollector::bind(config.flow.clone(), rules.clone(), handles.writer.clone()).await?;
        registry.spawn(flow).await;
    } else {
        tracing::info!("Flow listener disabled");
    }

    if config.trap.enabled {
        let trap = TrapCollector::bind(config.trap.clone(), handles.writer.clone()).await?;
        registry.spawn(trap).await;
    } else {
        tracing::info!("Trap listener disabled");
    }

    if config.poller.enabled && !config.devices.is_empty() {
        let devices = config
            .devices
            .iter()
            .map(|device| PolledDevice::from_config(device, &config.poller))
            .collect::<Result<Vec<_>, _>>()?;
        let poller = DevicePoller::new(devices, rules.clone(), config.poller.interval)
            .with_writer(handles.writer.clone());
        registry.spawn(poller).await;
    } else {
        tracing::info!("Device poller disabled or no devices configured");
    }

    for job in registry.list_jobs().await {
        tracing::info!("Running: {} ({}, {})", job.name, job.category, job.schedule);
    }
    tracing::info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;

    tracing::info!("Shutting down collectors...");
    registry
        .shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
        .await;

    shutdown_sink(handles);

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Flush and close every record stream.
fn shutdown_sink(handles: SinkHandles) {
    tracing::info!(
        records = handles.writer.appended(),
        "Shutting down sink..."
    );
    if let Err(e) = handles.shutdown() {
        tracing::error!("Failed to shutdown sink: {}", e);
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
