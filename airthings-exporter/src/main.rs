//! Prometheus exporter for Airthings devices.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use airthings_exporter::config::LogFormat;
use airthings_exporter::http::preflight;
use airthings_exporter::{ExporterConfig, ExporterStats, HttpServer, SensorCollector};

/// Prometheus exporter for Airthings devices.
#[derive(Parser, Debug)]
#[command(name = "airthings-exporter")]
#[command(about = "Export Airthings sensor readings as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Airthings API client id (overrides config).
    #[arg(long)]
    client_id: Option<String>,

    /// Airthings API client secret (overrides config).
    #[arg(long)]
    client_secret: Option<String>,

    /// Device serial number to poll; repeat for several devices (replaces config list).
    #[arg(long = "device-id")]
    device_ids: Vec<String>,

    /// Port to listen on (overrides the port of the listen address).
    #[arg(long)]
    port: Option<u16>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // Apply CLI overrides
    if let Some(client_id) = args.client_id {
        config.airthings.client_id = client_id;
    }
    if let Some(client_secret) = args.client_secret {
        config.airthings.client_secret = client_secret;
    }
    if !args.device_ids.is_empty() {
        config.airthings.device_ids = args.device_ids;
    }
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(port) = args.port {
        config.http.set_port(port);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    config.validate()?;

    // Initialize logging
    let log_level = config.logging.level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("airthings_exporter={}", log_level).parse()?)
        .add_directive(format!("reqwest={}", Level::WARN).parse()?);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!(
        devices = config.airthings.device_ids.len(),
        "Starting Airthings exporter"
    );

    let listen_addr: SocketAddr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let collector = SensorCollector::new(&config.airthings)?.into_shared();
    let stats = Arc::new(ExporterStats::new());

    // Initial API check; never fatal
    preflight(&collector).await;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(
        collector.clone(),
        stats,
        listen_addr,
        config.http.path.clone(),
    );

    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    let stats = collector.lock().await.stats();
    info!(
        collections = stats.collections,
        skipped_rate_limited = stats.skipped_rate_limited,
        upstream_requests = stats.upstream_requests,
        rate_limit_hits = stats.rate_limit_hits,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
