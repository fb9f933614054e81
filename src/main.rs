//! Home metrics - turns home-automation MQTT events into duration metrics
//!
//! Ingests raw device messages into an append-only event log and periodically
//! recomputes on-time, app usage, and temperature aggregates for Prometheus.
//!
//! Module structure:
//! - `domain/` - Event records and typed events (StateEvent, Reading, Window)
//! - `io/` - External interfaces (MQTT, event store, Prometheus sink, HTTP)
//! - `services/` - Reconstruction and the aggregation driver
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use home_metrics::infra::{Config, Metrics};
use home_metrics::io::{GaugeRegistry, HttpState, JsonlEventStore};
use home_metrics::services::Aggregator;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Home metrics - event-to-duration metrics service
#[derive(Parser, Debug)]
#[command(name = "home-metrics", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-entity and per-event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("home-metrics starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        mqtt_enabled = %config.mqtt_enabled(),
        store_path = %config.store_path(),
        http_port = %config.http_port(),
        interval_secs = %config.interval().as_secs(),
        binary_topics = ?config.binary_topics(),
        exclusive_topics = ?config.exclusive_topics(),
        temperature_topics = ?config.temperature_topics(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let store = Arc::new(JsonlEventStore::new(config.store_path()));
    let registry = Arc::new(GaugeRegistry::new());
    let metrics = Arc::new(Metrics::new());

    // Start MQTT ingestor
    if config.mqtt_enabled() {
        let mqtt_config = config.clone();
        let mqtt_log = store.clone();
        let mqtt_metrics = metrics.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = home_metrics::io::start_mqtt_ingestor(
                &mqtt_config,
                mqtt_log,
                mqtt_metrics,
                mqtt_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "MQTT ingestor error");
            }
        });
    }

    // Start HTTP server (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let ip: IpAddr = config.http_bind_address().parse()?;
        let addr = SocketAddr::from((ip, http_port));
        let state = HttpState {
            registry: registry.clone(),
            metrics: metrics.clone(),
            source: store.clone(),
            fetch_timeout: config.fetch_timeout(),
        };
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = home_metrics::io::start_http_server(addr, state, http_shutdown).await {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads)
    let metrics_clone = metrics.clone();
    let report_interval = config.report_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(report_interval);
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run aggregation until shutdown
    let aggregator = Aggregator::from_config(&config, store, registry, metrics);
    aggregator.run(config.interval(), shutdown_rx).await;

    info!("home-metrics shutdown complete");
    Ok(())
}
