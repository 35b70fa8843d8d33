//! Alert orchestration: cooldown filtering in front of the dispatch worker
//!
//! `process_activity` is called from camera workers and never blocks: it
//! applies the per-(camera, activity type) cooldown, stamps the cooldown
//! before enqueueing and hands the alert to the `AlertWorker` through a
//! bounded queue. A full queue drops the alert and counts it.

use crate::domain::activity::{ActivityType, SuspiciousActivity};
use crate::domain::alert::AlertRecord;
use crate::domain::annotation::FrameAnnotation;
use crate::domain::types::CameraId;
use crate::infra::config::AlertSettings;
use crate::infra::metrics::{AlertStats, Metrics};
use crate::services::alert_worker::{create_alert_worker, AlertCmd, AlertSink, SnapshotStore};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of `process_activity`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued(Uuid),
    /// Same camera and activity type alerted within the cooldown
    Suppressed,
    /// Queue full or dispatcher not running
    Dropped,
}

struct Running {
    cmd_tx: mpsc::Sender<AlertCmd>,
    handle: JoinHandle<()>,
    abandon: Arc<AtomicBool>,
}

pub struct AlertManager {
    settings: AlertSettings,
    metrics: Arc<Metrics>,
    sinks: Vec<Arc<dyn AlertSink>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    last_dispatch: Mutex<FxHashMap<(CameraId, ActivityType), Instant>>,
    running: Mutex<Option<Running>>,
}

impl AlertManager {
    pub fn new(settings: AlertSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            settings,
            metrics,
            sinks: Vec::new(),
            snapshots: None,
            last_dispatch: Mutex::new(FxHashMap::default()),
            running: Mutex::new(None),
        }
    }

    /// Sinks run in the order they were added
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Spawn the dispatch worker; must be called inside a tokio runtime.
    /// Returns false if it is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }
        let abandon = Arc::new(AtomicBool::new(false));
        let (cmd_tx, worker) = create_alert_worker(
            self.sinks.clone(),
            self.snapshots.clone(),
            self.metrics.clone(),
            abandon.clone(),
            self.settings.queue_capacity,
        );
        let handle = tokio::spawn(worker.run());
        *running = Some(Running { cmd_tx, handle, abandon });
        info!(
            queue_capacity = %self.settings.queue_capacity,
            cooldown_secs = %self.settings.cooldown.as_secs(),
            "alert_manager_started"
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Close the queue and wait up to `drain_timeout` for queued alerts.
    /// Alerts still queued after the timeout are abandoned; an in-flight
    /// dispatch is left to finish on its own.
    pub async fn stop(&self) {
        let Some(Running { cmd_tx, handle, abandon }) = self.running.lock().take() else {
            return;
        };
        drop(cmd_tx);

        match tokio::time::timeout(self.settings.drain_timeout, handle).await {
            Ok(Ok(())) => info!("alert_manager_stopped"),
            Ok(Err(e)) => warn!(error = %e, "alert_worker_join_failed"),
            Err(_) => {
                abandon.store(true, Ordering::Relaxed);
                warn!(
                    pending = %self.metrics.alert_queue_depth(),
                    timeout_ms = %self.settings.drain_timeout.as_millis(),
                    "alert_drain_timeout"
                );
            }
        }
    }

    /// Filter one activity through the cooldown and enqueue it for dispatch
    pub fn process_activity(
        &self,
        camera_id: &CameraId,
        activity: SuspiciousActivity,
        snapshot: Option<FrameAnnotation>,
    ) -> Dispatch {
        let kind = activity.activity_type();
        {
            let mut last_dispatch = self.last_dispatch.lock();
            let key = (camera_id.clone(), kind);
            if let Some(prev) = last_dispatch.get(&key) {
                let since = activity.timestamp.saturating_duration_since(*prev);
                if since < self.settings.cooldown {
                    self.metrics.record_alert_suppressed();
                    debug!(
                        camera = %camera_id,
                        activity = %kind,
                        remaining_ms = %(self.settings.cooldown - since).as_millis(),
                        "alert_suppressed_cooldown"
                    );
                    return Dispatch::Suppressed;
                }
            }
            last_dispatch.insert(key, activity.timestamp);
        }

        let Some(cmd_tx) = self.running.lock().as_ref().map(|r| r.cmd_tx.clone()) else {
            self.metrics.record_alert_dropped();
            warn!(camera = %camera_id, activity = %kind, "alert_manager_not_running");
            return Dispatch::Dropped;
        };

        let record = AlertRecord::new(camera_id.clone(), activity);
        let id = record.id;
        self.metrics.record_alert_enqueued(record.created_at.timestamp_millis().max(0) as u64);

        let cmd = AlertCmd { record, snapshot, enqueued_at: Instant::now() };
        match cmd_tx.try_send(cmd) {
            Ok(()) => {
                let depth = self.metrics.alert_queue_depth();
                if depth > self.settings.queue_warn_depth as u64 {
                    warn!(depth = %depth, "alert_queue_backlog");
                }
                Dispatch::Queued(id)
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.metrics.record_alert_dequeued(0);
                self.metrics.record_alert_dropped();
                warn!(camera = %camera_id, activity = %kind, alert_id = %id, "alert_queue_full");
                Dispatch::Dropped
            }
        }
    }

    /// Time left before `kind` may alert again for `camera_id`
    pub fn cooldown_remaining(
        &self,
        camera_id: &CameraId,
        kind: ActivityType,
        now: Instant,
    ) -> Option<Duration> {
        let last_dispatch = self.last_dispatch.lock();
        let prev = last_dispatch.get(&(camera_id.clone(), kind))?;
        self.settings.cooldown.checked_sub(now.saturating_duration_since(*prev)).filter(|d| !d.is_zero())
    }

    /// Drop cooldown state of a removed camera
    pub fn forget_camera(&self, camera_id: &CameraId) {
        self.last_dispatch.lock().retain(|(id, _), _| id != camera_id);
    }

    pub fn stats(&self) -> AlertStats {
        self.metrics.alert_stats()
    }
}
