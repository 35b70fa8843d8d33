//! Camera worker - one task per camera owning all of that camera's state
//!
//! Tick pipeline: capture -> track -> identify -> analyze -> authorization
//! memory -> alerts -> annotation + stats. Nothing here is shared with other
//! cameras except the stats entry, the metrics and the AlertManager.

use super::source::{CaptureError, FrameSource, TickInput};
use crate::domain::annotation::FrameAnnotation;
use crate::domain::types::{CameraStatus, Detection};
use crate::domain::zone::DetectionZone;
use crate::infra::config::{AnalyzerSettings, CameraConfig, SupervisorSettings, TrackerSettings};
use crate::infra::metrics::Metrics;
use crate::infra::stats::{ActivityLogEntry, CameraStats};
use crate::services::alert_manager::AlertManager;
use crate::services::analyzer::ActivityAnalyzer;
use crate::services::authorization::AuthorizationMemory;
use crate::services::object_tracker::TrackerFactory;
use crate::services::person_tracker::PersonTracker;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Latest annotation of a camera, `None` until the first analyzed tick
pub type AnnotationRx = watch::Receiver<Option<Arc<FrameAnnotation>>>;

/// Zone changes applied at the next tick boundary
#[derive(Debug)]
pub enum WorkerCommand {
    AddZone(DetectionZone),
    RemoveZone(String),
}

/// Settings every worker is built from
#[derive(Debug, Clone, Default)]
pub struct WorkerSettings {
    pub tracker: TrackerSettings,
    pub analyzer: AnalyzerSettings,
    pub supervisor: SupervisorSettings,
}

/// Shared handles a worker reports into
#[derive(Clone)]
pub struct WorkerDeps {
    pub trackers: Arc<dyn TrackerFactory>,
    pub alerts: Arc<AlertManager>,
    pub metrics: Arc<Metrics>,
}

enum Exit {
    Stopped,
    Failed(String),
}

pub struct CameraWorker {
    camera: CameraConfig,
    settings: SupervisorSettings,
    source: Box<dyn FrameSource>,
    tracker: PersonTracker,
    analyzer: ActivityAnalyzer,
    authorization: AuthorizationMemory,
    alerts: Arc<AlertManager>,
    metrics: Arc<Metrics>,
    stats: Arc<CameraStats>,
    annotation_tx: watch::Sender<Option<Arc<FrameAnnotation>>>,
    cmd_rx: mpsc::Receiver<WorkerCommand>,
    shutdown: watch::Receiver<bool>,
    /// Ticks seen since start, analyzed or not
    ticks: u64,
    last_annotation: Option<Arc<FrameAnnotation>>,
    fps_window: (Instant, u32),
}

impl CameraWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: CameraConfig,
        settings: &WorkerSettings,
        source: Box<dyn FrameSource>,
        deps: WorkerDeps,
        stats: Arc<CameraStats>,
        annotation_tx: watch::Sender<Option<Arc<FrameAnnotation>>>,
        cmd_rx: mpsc::Receiver<WorkerCommand>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let tracker =
            PersonTracker::new(camera.id.clone(), settings.tracker.clone(), deps.trackers.clone());
        let mut analyzer = ActivityAnalyzer::new(camera.id.clone(), settings.analyzer.clone());
        for zone in &camera.zones {
            // Zones were validated when the camera was configured
            analyzer.replace_zone(zone.clone());
        }
        Self {
            tracker,
            analyzer,
            authorization: AuthorizationMemory::new(settings.supervisor.max_frames_without_face),
            settings: settings.supervisor.clone(),
            camera,
            source,
            alerts: deps.alerts,
            metrics: deps.metrics,
            stats,
            annotation_tx,
            cmd_rx,
            shutdown,
            ticks: 0,
            last_annotation: None,
            fps_window: (Instant::now(), 0),
        }
    }

    pub async fn run(mut self) {
        self.stats.transition(CameraStatus::Running, None);
        info!(
            camera = %self.camera.id,
            name = %self.camera.name,
            zones = %self.analyzer.zones().len(),
            "camera_worker_started"
        );

        let exit = self.run_loop().await;

        match exit {
            Exit::Stopped => {
                self.stats.transition(CameraStatus::Stopping, None);
                self.stats.transition(CameraStatus::Stopped, None);
                info!(camera = %self.camera.id, ticks = %self.ticks, "camera_worker_stopped");
            }
            Exit::Failed(reason) => {
                error!(camera = %self.camera.id, reason = %reason, "camera_worker_failed");
                self.stats.transition(CameraStatus::Failed, Some(reason));
            }
        }
        self.tracker.clear();
        self.stats.clear_active_tracks();
    }

    async fn run_loop(&mut self) -> Exit {
        let mut consecutive_failures = 0u32;

        loop {
            if *self.shutdown.borrow() {
                return Exit::Stopped;
            }
            self.drain_commands();

            let captured = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return Exit::Stopped;
                    }
                    continue;
                }
                captured = self.source.next_tick() => captured,
            };

            match captured {
                Ok(input) => {
                    consecutive_failures = 0;
                    // Zone changes sent while capture was blocked govern this frame
                    self.drain_commands();
                    self.tick(input);
                }
                Err(CaptureError::EndOfStream) => {
                    info!(camera = %self.camera.id, "camera_source_exhausted");
                    return Exit::Stopped;
                }
                Err(CaptureError::Fatal(reason)) => {
                    self.stats.record_capture_failure();
                    return Exit::Failed(format!("capture failed: {reason}"));
                }
                Err(CaptureError::Transient(reason)) => {
                    consecutive_failures += 1;
                    self.stats.record_capture_failure();
                    warn!(
                        camera = %self.camera.id,
                        failures = %consecutive_failures,
                        max = %self.settings.max_capture_failures,
                        reason = %reason,
                        "camera_capture_failed"
                    );
                    if consecutive_failures >= self.settings.max_capture_failures {
                        return Exit::Failed(format!(
                            "capture failed {consecutive_failures} times in a row: {reason}"
                        ));
                    }

                    tokio::select! {
                        changed = self.shutdown.changed() => {
                            if changed.is_err() || *self.shutdown.borrow() {
                                return Exit::Stopped;
                            }
                        }
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                    }
                    match self.source.reconnect().await {
                        Ok(()) => debug!(camera = %self.camera.id, "camera_source_reconnected"),
                        Err(CaptureError::Transient(e)) => {
                            debug!(camera = %self.camera.id, error = %e, "camera_reconnect_failed");
                        }
                        Err(e) => return Exit::Failed(format!("reconnect failed: {e}")),
                    }
                }
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.apply(cmd);
        }
    }

    fn apply(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::AddZone(zone) => {
                info!(camera = %self.camera.id, zone = %zone.name(), "camera_zone_applied");
                self.analyzer.replace_zone(zone);
            }
            WorkerCommand::RemoveZone(name) => {
                if self.analyzer.remove_zone(&name) {
                    info!(camera = %self.camera.id, zone = %name, "camera_zone_removed");
                }
            }
        }
    }

    /// One captured frame
    fn tick(&mut self, input: TickInput) {
        let start = Instant::now();
        let TickInput { frame, detections, faces } = input;
        self.ticks += 1;
        self.stats.record_frame(detections.len());
        self.update_fps();

        let skip = self.settings.frame_skip_interval.max(1) as u64;
        if (self.ticks - 1) % skip != 0 {
            // Skipped frame: re-publish the last analysis for this frame
            if let Some(last) = &self.last_annotation {
                let mut reused = FrameAnnotation::clone(last);
                reused.frame_seq = frame.seq;
                self.annotation_tx.send_replace(Some(Arc::new(reused)));
            }
            return;
        }

        let now = frame.captured_at;
        let persons: Vec<Detection> = detections.iter().filter(|d| d.is_person()).cloned().collect();
        let mut tracks = self.tracker.update(&frame, &persons);
        self.tracker.assign_identities(&faces, &mut tracks);

        let mut activities = self.analyzer.analyze_frame(&detections, &tracks, now);

        if let Some(decision) = self.authorization.observe(!persons.is_empty(), &faces, now) {
            let fallback = persons.first().map(|d| d.bbox.center()).unwrap_or_default();
            let at = decision.location.unwrap_or(fallback);
            let zone_name = self.analyzer.zone_name_at(&at);
            warn!(
                camera = %self.camera.id,
                reason = %decision.reason.as_str(),
                names = ?decision.names,
                "intruder_alert"
            );
            activities.push(decision.into_activity(fallback, zone_name, now));
        }

        let annotation = Arc::new(FrameAnnotation::new(
            &self.camera.id,
            &frame,
            tracks.values(),
            self.analyzer.zones(),
            &activities,
        ));

        self.metrics.record_activities(activities.len());
        for activity in activities {
            self.stats.push_activity(ActivityLogEntry::from(&activity));
            self.alerts.process_activity(
                &self.camera.id,
                activity,
                Some(FrameAnnotation::clone(&annotation)),
            );
        }

        self.stats.record_analysis(tracks.len());
        self.annotation_tx.send_replace(Some(annotation.clone()));
        self.last_annotation = Some(annotation);
        self.metrics.record_tick(start.elapsed().as_micros() as u64);
    }

    fn update_fps(&mut self) {
        let (since, frames) = &mut self.fps_window;
        *frames += 1;
        let elapsed = since.elapsed();
        if elapsed.as_secs_f64() >= 1.0 {
            self.stats.set_fps(*frames as f64 / elapsed.as_secs_f64());
            *since = Instant::now();
            *frames = 0;
        }
    }
}

