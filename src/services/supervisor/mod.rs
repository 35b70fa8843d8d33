//! Camera supervisor - owns one worker task per camera
//!
//! The supervisor keeps the configured camera set and, for running cameras,
//! the worker's shutdown signal, command channel and join handle. Workers
//! share nothing but the stats registry, metrics and the AlertManager.
//!
//! - `source` - frame source traits and capture errors
//! - `worker` - the per-camera tick loop
//! - `discovery` - periodic reconciliation against a camera directory

pub mod discovery;
pub mod source;
pub mod worker;
#[cfg(test)]
mod tests;

pub use discovery::{run_discovery, CameraDirectory, ConfigFileDirectory};
pub use source::{CaptureError, FrameSource, SourceFactory, TickInput};
pub use worker::{AnnotationRx, CameraWorker, WorkerCommand, WorkerDeps, WorkerSettings};

use crate::domain::types::{CameraId, CameraStatus};
use crate::domain::zone::{DetectionZone, ZoneError};
use crate::infra::config::{CameraConfig, Config};
use crate::infra::stats::{CameraStatsSnapshot, StatsRegistry};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pending zone commands per worker
const WORKER_COMMAND_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown camera '{0}'")]
    UnknownCamera(CameraId),
    #[error("camera '{0}' is already registered")]
    DuplicateCamera(CameraId),
    #[error("camera '{camera}': {source}")]
    InvalidZone { camera: CameraId, source: ZoneError },
    #[error("camera '{camera}' could not open its source: {source}")]
    Capture { camera: CameraId, source: CaptureError },
}

struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    cmd_tx: mpsc::Sender<WorkerCommand>,
    join: JoinHandle<()>,
    annotations: AnnotationRx,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }
}

struct CameraEntry {
    config: CameraConfig,
    worker: Option<WorkerHandle>,
}

pub struct CameraSupervisor {
    settings: WorkerSettings,
    sources: Arc<dyn SourceFactory>,
    deps: WorkerDeps,
    stats: Arc<StatsRegistry>,
    cameras: Mutex<FxHashMap<CameraId, CameraEntry>>,
}

impl CameraSupervisor {
    pub fn new(
        settings: WorkerSettings,
        sources: Arc<dyn SourceFactory>,
        deps: WorkerDeps,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self { settings, sources, deps, stats, cameras: Mutex::new(FxHashMap::default()) }
    }

    /// Build from a loaded config and register its cameras
    pub fn from_config(
        config: &Config,
        sources: Arc<dyn SourceFactory>,
        deps: WorkerDeps,
        stats: Arc<StatsRegistry>,
    ) -> Result<Self, SupervisorError> {
        let settings = WorkerSettings {
            tracker: config.tracker().clone(),
            analyzer: config.analyzer().clone(),
            supervisor: config.supervisor().clone(),
        };
        let supervisor = Self::new(settings, sources, deps, stats);
        for camera in config.cameras() {
            supervisor.add_camera(camera.clone())?;
        }
        Ok(supervisor)
    }

    pub fn add_camera(&self, config: CameraConfig) -> Result<(), SupervisorError> {
        let mut cameras = self.cameras.lock();
        if cameras.contains_key(&config.id) {
            return Err(SupervisorError::DuplicateCamera(config.id));
        }
        self.stats.register(&config.id, self.settings.supervisor.activity_log_capacity);
        info!(camera = %config.id, source = %config.source, enabled = %config.enabled, "camera_added");
        cameras.insert(config.id.clone(), CameraEntry { config, worker: None });
        Ok(())
    }

    /// Stop the camera and drop all of its state
    pub async fn remove_camera(&self, id: &CameraId) -> Result<(), SupervisorError> {
        if !self.cameras.lock().contains_key(id) {
            return Err(SupervisorError::UnknownCamera(id.clone()));
        }
        self.stop(id).await?;
        self.cameras.lock().remove(id);
        self.stats.remove(id);
        self.deps.alerts.forget_camera(id);
        info!(camera = %id, "camera_removed");
        Ok(())
    }

    pub async fn start(&self, id: &CameraId) -> Result<(), SupervisorError> {
        let config = {
            let mut cameras = self.cameras.lock();
            let entry =
                cameras.get_mut(id).ok_or_else(|| SupervisorError::UnknownCamera(id.clone()))?;
            if entry.worker.as_ref().is_some_and(WorkerHandle::is_alive) {
                return Ok(());
            }
            entry.worker = None;
            entry.config.clone()
        };

        let stats = self.stats.register(id, self.settings.supervisor.activity_log_capacity);
        if stats.status() == CameraStatus::Running {
            // A previous worker ended without reporting; restart from stopped
            stats.transition(CameraStatus::Stopping, None);
            stats.transition(CameraStatus::Stopped, None);
        }
        stats.transition(CameraStatus::Starting, None);

        let source = match self.sources.open(&config).await {
            Ok(source) => source,
            Err(e) => {
                stats.transition(CameraStatus::Failed, Some(e.to_string()));
                warn!(camera = %id, error = %e, "camera_start_failed");
                return Err(SupervisorError::Capture { camera: id.clone(), source: e });
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (cmd_tx, cmd_rx) = mpsc::channel(WORKER_COMMAND_BUFFER);
        let (annotation_tx, annotations) = watch::channel(None);
        let worker = CameraWorker::new(
            config,
            &self.settings,
            source,
            self.deps.clone(),
            stats,
            annotation_tx,
            cmd_rx,
            shutdown_rx,
        );
        let join = tokio::spawn(worker.run());

        let mut cameras = self.cameras.lock();
        match cameras.get_mut(id) {
            Some(entry) => {
                entry.worker = Some(WorkerHandle { shutdown, cmd_tx, join, annotations });
                info!(camera = %id, "camera_started");
                Ok(())
            }
            None => {
                // Removed while the source was opening
                let _ = shutdown.send(true);
                Err(SupervisorError::UnknownCamera(id.clone()))
            }
        }
    }

    /// Signal the worker and wait up to the join timeout
    pub async fn stop(&self, id: &CameraId) -> Result<(), SupervisorError> {
        let handle = {
            let mut cameras = self.cameras.lock();
            let entry =
                cameras.get_mut(id).ok_or_else(|| SupervisorError::UnknownCamera(id.clone()))?;
            entry.worker.take()
        };
        if let Some(handle) = handle {
            self.signal(id, &handle);
            self.join(id, handle).await;
        }
        Ok(())
    }

    /// Start every enabled camera that is not running; returns how many started
    pub async fn start_all(&self) -> usize {
        let ids: Vec<CameraId> = {
            let cameras = self.cameras.lock();
            let mut ids: Vec<CameraId> = cameras
                .values()
                .filter(|e| e.config.enabled)
                .filter(|e| !e.worker.as_ref().is_some_and(WorkerHandle::is_alive))
                .map(|e| e.config.id.clone())
                .collect();
            ids.sort();
            ids
        };

        let mut started = 0;
        for id in ids {
            match self.start(&id).await {
                Ok(()) => started += 1,
                Err(e) => warn!(camera = %id, error = %e, "camera_start_skipped"),
            }
        }
        started
    }

    /// Signal every worker first, then join them one by one
    pub async fn stop_all(&self) {
        let handles: Vec<(CameraId, WorkerHandle)> = {
            let mut cameras = self.cameras.lock();
            cameras
                .iter_mut()
                .filter_map(|(id, e)| e.worker.take().map(|h| (id.clone(), h)))
                .collect()
        };
        for (id, handle) in &handles {
            self.signal(id, handle);
        }
        for (id, handle) in handles {
            self.join(&id, handle).await;
        }
        info!("all_cameras_stopped");
    }

    /// Validate and add a zone; a running worker picks it up at its next tick
    pub async fn add_zone(&self, id: &CameraId, zone: DetectionZone) -> Result<(), SupervisorError> {
        let cmd_tx = {
            let mut cameras = self.cameras.lock();
            let entry =
                cameras.get_mut(id).ok_or_else(|| SupervisorError::UnknownCamera(id.clone()))?;
            if entry.config.zones.iter().any(|z| z.name() == zone.name()) {
                return Err(SupervisorError::InvalidZone {
                    camera: id.clone(),
                    source: ZoneError::Duplicate(zone.name().to_string()),
                });
            }
            entry.config.zones.push(zone.clone());
            entry.worker.as_ref().filter(|w| w.is_alive()).map(|w| w.cmd_tx.clone())
        };
        info!(camera = %id, zone = %zone.name(), "camera_zone_added");
        if let Some(cmd_tx) = cmd_tx {
            // A worker that exited meanwhile restarts from the updated config
            let _ = cmd_tx.send(WorkerCommand::AddZone(zone)).await;
        }
        Ok(())
    }

    /// Remove a zone by name; false when the camera has no such zone
    pub async fn remove_zone(&self, id: &CameraId, name: &str) -> Result<bool, SupervisorError> {
        let cmd_tx = {
            let mut cameras = self.cameras.lock();
            let entry =
                cameras.get_mut(id).ok_or_else(|| SupervisorError::UnknownCamera(id.clone()))?;
            let before = entry.config.zones.len();
            entry.config.zones.retain(|z| z.name() != name);
            if entry.config.zones.len() == before {
                return Ok(false);
            }
            entry.worker.as_ref().filter(|w| w.is_alive()).map(|w| w.cmd_tx.clone())
        };
        if let Some(cmd_tx) = cmd_tx {
            let _ = cmd_tx.send(WorkerCommand::RemoveZone(name.to_string())).await;
        }
        Ok(true)
    }

    /// Bring the camera set in line with `desired`.
    ///
    /// Cameras missing from `desired` are stopped and removed, new ones are
    /// added and started when enabled, and cameras whose `enabled` flag
    /// flipped are started or stopped. Other running cameras are untouched.
    /// Returns (started, stopped).
    pub async fn reconcile(&self, desired: Vec<CameraConfig>) -> (usize, usize) {
        let mut to_start = Vec::new();
        let mut to_stop = Vec::new();
        let mut to_remove = Vec::new();
        {
            let mut cameras = self.cameras.lock();
            let wanted: FxHashMap<&CameraId, &CameraConfig> =
                desired.iter().map(|c| (&c.id, c)).collect();
            for id in cameras.keys() {
                if !wanted.contains_key(id) {
                    to_remove.push(id.clone());
                }
            }
            for camera in &desired {
                match cameras.get_mut(&camera.id) {
                    None => {
                        self.stats
                            .register(&camera.id, self.settings.supervisor.activity_log_capacity);
                        cameras.insert(
                            camera.id.clone(),
                            CameraEntry { config: camera.clone(), worker: None },
                        );
                        info!(camera = %camera.id, "camera_discovered");
                        if camera.enabled {
                            to_start.push(camera.id.clone());
                        }
                    }
                    Some(entry) => {
                        let was_enabled = entry.config.enabled;
                        let alive = entry.worker.as_ref().is_some_and(WorkerHandle::is_alive);
                        entry.config.enabled = camera.enabled;
                        if camera.enabled && !was_enabled && !alive {
                            to_start.push(camera.id.clone());
                        } else if !camera.enabled && alive {
                            to_stop.push(camera.id.clone());
                        }
                    }
                }
            }
        }

        let stopped = to_stop.len() + to_remove.len();
        for id in &to_stop {
            let _ = self.stop(id).await;
        }
        for id in &to_remove {
            let _ = self.remove_camera(id).await;
        }
        let mut started = 0;
        for id in &to_start {
            match self.start(id).await {
                Ok(()) => started += 1,
                Err(e) => warn!(camera = %id, error = %e, "camera_start_skipped"),
            }
        }
        if started + stopped > 0 {
            info!(started = %started, stopped = %stopped, "cameras_reconciled");
        }
        (started, stopped)
    }

    pub fn is_running(&self, id: &CameraId) -> bool {
        self.cameras
            .lock()
            .get(id)
            .and_then(|e| e.worker.as_ref())
            .is_some_and(WorkerHandle::is_alive)
    }

    /// Ids of configured cameras, sorted
    pub fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self.cameras.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Latest annotations of a running camera
    pub fn subscribe(&self, id: &CameraId) -> Option<AnnotationRx> {
        self.cameras.lock().get(id).and_then(|e| e.worker.as_ref()).map(|w| w.annotations.clone())
    }

    pub fn stats(&self, id: &CameraId) -> Option<CameraStatsSnapshot> {
        self.stats.snapshot(id)
    }

    pub fn all_stats(&self) -> Vec<CameraStatsSnapshot> {
        self.stats.snapshot_all()
    }

    fn signal(&self, id: &CameraId, handle: &WorkerHandle) {
        if let Some(stats) = self.stats.get(id) {
            stats.transition(CameraStatus::Stopping, None);
        }
        let _ = handle.shutdown.send(true);
    }

    async fn join(&self, id: &CameraId, handle: WorkerHandle) {
        let timeout = self.settings.supervisor.join_timeout;
        let abort = handle.join.abort_handle();
        match tokio::time::timeout(timeout, handle.join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(camera = %id, error = %e, "camera_worker_join_failed"),
            Err(_) => {
                warn!(camera = %id, timeout_ms = %timeout.as_millis(), "camera_worker_join_timeout");
                abort.abort();
            }
        }
        if let Some(stats) = self.stats.get(id) {
            if stats.status() == CameraStatus::Stopping {
                stats.transition(CameraStatus::Stopped, None);
            }
        }
        info!(camera = %id, "camera_stopped");
    }
}
