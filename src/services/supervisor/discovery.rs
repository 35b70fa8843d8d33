//! Background camera discovery
//!
//! Periodically asks a `CameraDirectory` for the desired camera set and
//! reconciles the supervisor against it.

use super::CameraSupervisor;
use crate::infra::config::{CameraConfig, Config};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[async_trait]
pub trait CameraDirectory: Send + Sync {
    async fn desired_cameras(&self) -> anyhow::Result<Vec<CameraConfig>>;
}

/// Re-reads the `[[cameras]]` tables of a config file
pub struct ConfigFileDirectory {
    path: PathBuf,
}

impl ConfigFileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CameraDirectory for ConfigFileDirectory {
    async fn desired_cameras(&self) -> anyhow::Result<Vec<CameraConfig>> {
        let path = self.path.clone();
        let config = tokio::task::spawn_blocking(move || Config::from_file(path)).await??;
        Ok(config.cameras().to_vec())
    }
}

/// Reconcile every `interval` until shutdown.
///
/// A directory error keeps the current camera set.
pub async fn run_discovery(
    supervisor: Arc<CameraSupervisor>,
    directory: Arc<dyn CameraDirectory>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = %interval.as_secs(), "camera_discovery_started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; the initial set was started by the caller
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("camera_discovery_stopped");
                    return;
                }
                continue;
            }
        }

        match directory.desired_cameras().await {
            Ok(desired) => {
                let (started, stopped) = supervisor.reconcile(desired).await;
                debug!(started = %started, stopped = %stopped, "camera_discovery_pass");
            }
            Err(e) => warn!(error = %format!("{e:#}"), "camera_discovery_failed"),
        }
    }
}
