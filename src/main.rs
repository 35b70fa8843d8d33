//! Sentinel monitor - multi-camera security monitoring core
//!
//! Replays detector and face recognizer output per camera, tracks people,
//! flags suspicious activity and dispatches alerts.
//!
//! Module structure:
//! - `domain/` - Core types (tracks, zones, activities, alerts)
//! - `io/` - External interfaces (replay feed, alert sinks, status HTTP)
//! - `services/` - Business logic (tracking, analysis, alerting, supervisor)
//! - `infra/` - Infrastructure (Config, Metrics, camera stats)

use anyhow::Context;
use clap::Parser;
use sentinel_monitor::domain::types::CameraStatus;
use sentinel_monitor::infra::{Config, Metrics, StatsRegistry};
use sentinel_monitor::io::{
    start_status_server, AlertLog, JsonSnapshotStore, MqttNotifier, ReplaySourceFactory,
    StatusContext, WebhookNotifier,
};
use sentinel_monitor::services::supervisor::run_discovery;
use sentinel_monitor::services::{
    AlertManager, CameraSupervisor, ConfigFileDirectory, MotionTrackerFactory, WorkerDeps,
};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Sentinel monitor - camera security monitoring
#[derive(Parser, Debug)]
#[command(name = "sentinel-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-tick visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::new(Rfc3339))
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_alert_manager(config: &Config, metrics: Arc<Metrics>) -> anyhow::Result<AlertManager> {
    let settings = config.alerts().clone();
    let mut manager = AlertManager::new(settings.clone(), metrics);

    if let Some(path) = &settings.log_file {
        manager = manager.with_sink(Arc::new(AlertLog::new(path)));
    }
    if config.mqtt_enabled() {
        manager = manager.with_sink(Arc::new(MqttNotifier::new(config)));
    }
    if let Some(url) = config.webhook_url() {
        let timeout = Duration::from_millis(config.webhook_timeout_ms());
        manager = manager.with_sink(Arc::new(WebhookNotifier::new(url, timeout)?));
    }
    if let Some(dir) = &settings.snapshot_dir {
        manager = manager.with_snapshot_store(Arc::new(JsonSnapshotStore::new(dir)));
    }
    Ok(manager)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "sentinel-monitor starting");

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        cameras = %config.cameras().len(),
        mqtt_enabled = %config.mqtt_enabled(),
        webhook = ?config.webhook_url(),
        status_port = %config.status_port(),
        cooldown_secs = %config.alerts().cooldown.as_secs(),
        frame_skip = %config.supervisor().frame_skip_interval,
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let alerts = Arc::new(build_alert_manager(&config, metrics.clone())?);
    alerts.start();

    let stats = Arc::new(StatsRegistry::new());
    let deps = WorkerDeps {
        trackers: Arc::new(MotionTrackerFactory::default()),
        alerts: alerts.clone(),
        metrics: metrics.clone(),
    };
    let supervisor = Arc::new(
        CameraSupervisor::from_config(
            &config,
            Arc::new(ReplaySourceFactory::new()),
            deps,
            stats.clone(),
        )
        .context("invalid camera configuration")?,
    );
    let started = supervisor.start_all().await;
    info!(started = %started, configured = %config.cameras().len(), "cameras_started");

    // Status HTTP server (if port > 0)
    let status_port = config.status_port();
    if status_port > 0 {
        let ctx = Arc::new(StatusContext {
            site_id: config.site_id().to_string(),
            metrics: metrics.clone(),
            stats: stats.clone(),
        });
        let status_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_status_server(status_port, ctx, status_shutdown).await {
                error!(error = %format!("{e:#}"), "status_server_error");
            }
        });
    }

    // Periodic metrics summary
    let reporter_metrics = metrics.clone();
    let reporter_stats = stats.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = reporter_metrics.report(
                reporter_stats.count_in(CameraStatus::Running),
                reporter_stats.total_active_tracks(),
            );
            summary.log();
        }
    });

    // Camera discovery re-reads the config file's camera list
    let discovery_interval = config.supervisor().discovery_interval;
    if !discovery_interval.is_zero() {
        let directory = Arc::new(ConfigFileDirectory::new(&config_path));
        tokio::spawn(run_discovery(
            supervisor.clone(),
            directory,
            discovery_interval,
            shutdown_rx.clone(),
        ));
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    supervisor.stop_all().await;
    alerts.stop().await;

    let final_stats = alerts.stats();
    info!(
        alerts = %final_stats.total_alerts,
        suppressed = %final_stats.suppressed,
        dropped = %final_stats.dropped,
        "sentinel-monitor shutdown complete"
    );
    Ok(())
}
