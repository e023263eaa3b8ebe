//! Vision crossing - finish/start line photo capture service
//!
//! Watches tracked detections from a race camera, credits each tracked person
//! with at most one line crossing per run and writes EXIF-tagged evidence.
//!
//! Module structure:
//! - `domain/` - Core types, crossing geometry, errors
//! - `io/` - Collaborators (detection streams, frames, file sink, config/status/events services)
//! - `services/` - Crossing tracker, analysis loop, evidence, orchestration
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use vision_crossing::domain::types::RaceEvent;
use vision_crossing::infra::{BackendMode, Config, Metrics, StreamMode};
use vision_crossing::io::{
    ConfigStore, Credentials, EventsClient, HttpConfigStore, HttpStatusSink, JpegFileSink, JsonFileConfigStore,
    JsonFileStatusLog, MqttOpener, MqttStreamConfig, ReplayOpener, StatusSink, StreamOpener, UserClient,
};
use vision_crossing::services::orchestrator::{login_with_retry, resolve_status_type, wait_for_event};
use vision_crossing::services::trigger_line::load_font;
use vision_crossing::services::{AnalysisRunner, Collaborators, Orchestrator};

/// Vision crossing - line-crossing photo capture
#[derive(Parser, Debug)]
#[command(name = "vision-crossing", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default: INFO, use RUST_LOG=debug to see skipped detections
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "vision-crossing starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        backend = %config.backend_mode().as_str(),
        stream = %config.stream_mode().as_str(),
        photos_dir = %config.photos_dir().display(),
        poll_interval_secs = %config.poll_interval_secs(),
        person_class_id = %config.person_class_id(),
        confidence_floor = %config.confidence_floor(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let metrics = Arc::new(Metrics::new());

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let poll_interval = Duration::from_secs(config.poll_interval_secs());
    let http_timeout = Duration::from_millis(config.http_timeout_ms());

    let (event, config_store, status): (RaceEvent, Arc<dyn ConfigStore>, Arc<dyn StatusSink>) =
        match config.backend_mode() {
            BackendMode::Http => {
                let users = UserClient::new(config.users_url(), http_timeout)?;
                let credentials = Credentials::from_env();
                let Some(token) = login_with_retry(&users, &credentials, poll_interval, &mut shutdown_rx).await
                else {
                    info!("shutdown before login");
                    return Ok(());
                };

                let events = EventsClient::new(config.events_url(), http_timeout)?;
                let Some(event) =
                    wait_for_event(&events, &token, config.event_id(), poll_interval, &mut shutdown_rx).await
                else {
                    info!("shutdown before event selection");
                    return Ok(());
                };

                (
                    event,
                    Arc::new(HttpConfigStore::new(config.config_url(), &token, http_timeout)?) as Arc<dyn ConfigStore>,
                    Arc::new(HttpStatusSink::new(config.status_url(), &token, http_timeout)?) as Arc<dyn StatusSink>,
                )
            }
            BackendMode::File => (
                RaceEvent::with_id(config.event_id().unwrap_or("local")),
                Arc::new(JsonFileConfigStore::new(config.settings_file())) as Arc<dyn ConfigStore>,
                Arc::new(JsonFileStatusLog::new(config.status_file())) as Arc<dyn StatusSink>,
            ),
        };

    let streams: Arc<dyn StreamOpener> = match config.stream_mode() {
        StreamMode::Replay => Arc::new(ReplayOpener::new(config.detections_file())),
        StreamMode::Mqtt => Arc::new(MqttOpener::new(MqttStreamConfig::from_config(&config))),
    };

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        let prom_event = event.id.clone();
        tokio::spawn(async move {
            if let Err(e) = vision_crossing::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_event,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    let status_type = resolve_status_type(config_store.as_ref(), &event.id, config.status_type()).await;
    let collab = Collaborators { config_store, status, file_sink: Arc::new(JpegFileSink::new()), streams };
    let runner = AnalysisRunner::new(collab, metrics, &config, load_font(config.font_path()), &event.id, &status_type);

    info!(event_id = %event.id, name = %event.name, status_type = %status_type, "orchestrator_starting");
    Orchestrator::new(runner, event, poll_interval).run(shutdown_rx).await;

    info!("vision-crossing shutdown complete");
    Ok(())
}
