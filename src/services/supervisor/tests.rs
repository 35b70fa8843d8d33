//! Tests for the CameraSupervisor and camera workers

use super::*;
use crate::domain::activity::{ActivityEvidence, ActivityType, IntruderReason, ThreatLevel};
use crate::domain::alert::AlertRecord;
use crate::domain::types::{BoundingBox, Detection, FaceVerdict, Frame, Point};
use crate::domain::zone::ZoneType;
use crate::infra::config::{AlertSettings, AnalyzerSettings, SupervisorSettings, TrackerSettings};
use crate::infra::metrics::Metrics;
use crate::services::alert_manager::AlertManager;
use crate::services::alert_worker::AlertSink;
use crate::services::object_tracker::MotionTrackerFactory;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

// ============================================================================
// Scripted sources
// ============================================================================

enum Script {
    /// Fixed ticks, then end of stream
    Finite(VecDeque<Result<TickInput, CaptureError>>),
    /// Empty frames forever, one every `period`
    Endless { period: Duration, seq: u64 },
    /// `before`, then block until `gate` is notified, then `after`
    Gated { before: VecDeque<TickInput>, gate: Option<Arc<Notify>>, after: VecDeque<TickInput> },
}

struct ScriptedSource {
    script: Script,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_tick(&mut self) -> Result<TickInput, CaptureError> {
        match &mut self.script {
            Script::Finite(ticks) => ticks.pop_front().unwrap_or(Err(CaptureError::EndOfStream)),
            Script::Endless { period, seq } => {
                tokio::time::sleep(*period).await;
                *seq += 1;
                Ok(TickInput {
                    frame: Frame::new(*seq, Instant::now()),
                    detections: vec![],
                    faces: vec![],
                })
            }
            Script::Gated { before, gate, after } => {
                if let Some(tick) = before.pop_front() {
                    return Ok(tick);
                }
                if let Some(gate) = gate.take() {
                    gate.notified().await;
                }
                after.pop_front().ok_or(CaptureError::EndOfStream)
            }
        }
    }
}

#[derive(Default)]
struct ScriptedSources {
    scripts: parking_lot::Mutex<FxHashMap<CameraId, Script>>,
}

impl ScriptedSources {
    fn finite(&self, id: &str, ticks: Vec<Result<TickInput, CaptureError>>) {
        self.scripts.lock().insert(CameraId::from(id), Script::Finite(ticks.into()));
    }

    /// Returns the gate that releases `after`
    fn gated(&self, id: &str, before: Vec<TickInput>, after: Vec<TickInput>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.scripts.lock().insert(
            CameraId::from(id),
            Script::Gated { before: before.into(), gate: Some(gate.clone()), after: after.into() },
        );
        gate
    }

    fn endless(&self, id: &str) {
        self.scripts
            .lock()
            .insert(CameraId::from(id), Script::Endless { period: Duration::from_millis(5), seq: 0 });
    }
}

#[async_trait]
impl SourceFactory for ScriptedSources {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
        let script = self
            .scripts
            .lock()
            .remove(&camera.id)
            .ok_or_else(|| CaptureError::Fatal(format!("no script for {}", camera.id)))?;
        Ok(Box::new(ScriptedSource { script }))
    }
}

#[derive(Default)]
struct RecordingSink {
    delivered: parking_lot::Mutex<Vec<AlertRecord>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, alert: &AlertRecord) -> anyhow::Result<()> {
        self.delivered.lock().push(alert.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    supervisor: CameraSupervisor,
    sources: Arc<ScriptedSources>,
    alerts: Arc<AlertManager>,
    sink: Arc<RecordingSink>,
}

fn worker_settings() -> WorkerSettings {
    WorkerSettings {
        tracker: TrackerSettings { min_track_length: 3, ..Default::default() },
        analyzer: AnalyzerSettings::default(),
        supervisor: SupervisorSettings {
            frame_skip_interval: 1,
            reconnect_delay: Duration::from_millis(1),
            join_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    }
}

fn harness(settings: WorkerSettings) -> Harness {
    let metrics = Arc::new(Metrics::new());
    let sink = Arc::new(RecordingSink::default());
    let alerts =
        Arc::new(AlertManager::new(AlertSettings::default(), metrics.clone()).with_sink(sink.clone()));
    alerts.start();
    let sources = Arc::new(ScriptedSources::default());
    let deps = WorkerDeps {
        trackers: Arc::new(MotionTrackerFactory::default()),
        alerts: alerts.clone(),
        metrics,
    };
    let supervisor =
        CameraSupervisor::new(settings, sources.clone(), deps, Arc::new(StatsRegistry::new()));
    Harness { supervisor, sources, alerts, sink }
}

async fn wait_for_status(supervisor: &CameraSupervisor, id: &CameraId, status: CameraStatus) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if supervisor.stats(id).is_some_and(|s| s.status == status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("camera {id} never reached {status}: {:?}", supervisor.stats(id).map(|s| s.status));
}

fn vault() -> DetectionZone {
    DetectionZone::new(
        "vault",
        vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ],
        ZoneType::Restricted,
        [ActivityType::ZoneIntrusion],
    )
    .unwrap()
}

/// A person standing at (50, 50) whose face is unknown
fn intruder_ticks(n: u64) -> Vec<Result<TickInput, CaptureError>> {
    let t0 = Instant::now();
    (0..n)
        .map(|i| {
            Ok(TickInput {
                frame: Frame::new(i, t0 + Duration::from_millis(100 * i)),
                detections: vec![Detection::person(BoundingBox::new(30.0, 10.0, 70.0, 90.0), 0.9)],
                faces: vec![FaceVerdict {
                    name: "unknown".to_string(),
                    bbox: BoundingBox::new(40.0, 15.0, 60.0, 35.0),
                    is_authorized: false,
                }],
            })
        })
        .collect()
}

/// A person with no visible face standing at `center`, ticks `seqs`, `spacing` apart
fn standing_ticks(
    seqs: std::ops::Range<u64>,
    center: Point,
    t0: Instant,
    spacing: Duration,
) -> Vec<TickInput> {
    let bbox = BoundingBox::new(center.x - 20.0, center.y - 40.0, center.x + 20.0, center.y + 40.0);
    seqs.map(|i| TickInput {
        frame: Frame::new(i, t0 + spacing * i as u32),
        detections: vec![Detection::person(bbox, 0.9)],
        faces: vec![],
    })
    .collect()
}

// ============================================================================
// Worker pipeline
// ============================================================================

#[tokio::test]
async fn test_intruder_in_restricted_zone_end_to_end() {
    let h = harness(worker_settings());
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted").with_zone(vault())).unwrap();
    h.sources.finite("cam-1", intruder_ticks(15));

    h.supervisor.start(&id).await.unwrap();
    wait_for_status(&h.supervisor, &id, CameraStatus::Stopped).await;
    h.alerts.stop().await;

    let delivered = h.sink.delivered.lock();
    let count = |kind: ActivityType| {
        delivered.iter().filter(|r| r.activity.activity_type() == kind).count()
    };
    assert_eq!(count(ActivityType::ZoneIntrusion), 1);
    assert_eq!(count(ActivityType::UnauthorizedPerson), 1);
    assert_eq!(count(ActivityType::Intruder), 1);
    assert_eq!(delivered.len(), 3);

    let intrusion = delivered
        .iter()
        .find(|r| r.activity.activity_type() == ActivityType::ZoneIntrusion)
        .unwrap();
    assert_eq!(intrusion.activity.threat_level, ThreatLevel::High);
    assert_eq!(intrusion.activity.zone_name, "vault");
    assert_eq!(intrusion.camera_id, id);

    let intruder =
        delivered.iter().find(|r| r.activity.activity_type() == ActivityType::Intruder).unwrap();
    assert!(matches!(
        intruder.activity.evidence,
        ActivityEvidence::Intruder { reason: IntruderReason::UnknownFace, .. }
    ));

    let stats = h.supervisor.stats(&id).unwrap();
    assert_eq!(stats.frames_processed, 15);
    assert_eq!(stats.frames_analyzed, 15);
    assert_eq!(stats.total_detections, 15);
    // Every intruder tick lands in the activity log, not just the alerted ones
    assert!(stats.recent_activities.len() >= 15);
    assert_eq!(stats.active_tracks, 0);
}

#[tokio::test]
async fn test_frame_skip_interval() {
    let settings = WorkerSettings {
        supervisor: SupervisorSettings { frame_skip_interval: 3, ..worker_settings().supervisor },
        ..worker_settings()
    };
    let h = harness(settings);
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();
    h.sources.finite("cam-1", intruder_ticks(9));

    h.supervisor.start(&id).await.unwrap();
    wait_for_status(&h.supervisor, &id, CameraStatus::Stopped).await;

    let stats = h.supervisor.stats(&id).unwrap();
    assert_eq!(stats.frames_processed, 9);
    assert_eq!(stats.frames_analyzed, 3);
}

#[tokio::test]
async fn test_transient_failures_mark_camera_failed() {
    let settings = WorkerSettings {
        supervisor: SupervisorSettings { max_capture_failures: 3, ..worker_settings().supervisor },
        ..worker_settings()
    };
    let h = harness(settings);
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();
    let mut ticks = intruder_ticks(1);
    ticks.push(Err(CaptureError::Transient("timeout".into())));
    ticks.push(Err(CaptureError::Transient("timeout".into())));
    ticks.push(Err(CaptureError::Transient("timeout".into())));
    h.sources.finite("cam-1", ticks);

    h.supervisor.start(&id).await.unwrap();
    wait_for_status(&h.supervisor, &id, CameraStatus::Failed).await;

    let stats = h.supervisor.stats(&id).unwrap();
    assert_eq!(stats.capture_failures, 3);
    assert!(stats.reason.unwrap().contains("3 times"));
    assert!(!h.supervisor.is_running(&id));
}

#[tokio::test]
async fn test_recovered_capture_resets_failure_count() {
    let settings = WorkerSettings {
        supervisor: SupervisorSettings { max_capture_failures: 2, ..worker_settings().supervisor },
        ..worker_settings()
    };
    let h = harness(settings);
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();
    let mut ticks = Vec::new();
    for tick in intruder_ticks(3) {
        ticks.push(Err(CaptureError::Transient("glitch".into())));
        ticks.push(tick);
    }
    h.sources.finite("cam-1", ticks);

    h.supervisor.start(&id).await.unwrap();
    wait_for_status(&h.supervisor, &id, CameraStatus::Stopped).await;
    let stats = h.supervisor.stats(&id).unwrap();
    assert_eq!(stats.capture_failures, 3);
    assert_eq!(stats.frames_processed, 3);
}

#[tokio::test]
async fn test_fatal_capture_fails_immediately() {
    let h = harness(worker_settings());
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();
    h.sources.finite("cam-1", vec![Err(CaptureError::Fatal("device gone".into()))]);

    h.supervisor.start(&id).await.unwrap();
    wait_for_status(&h.supervisor, &id, CameraStatus::Failed).await;
    assert!(h.supervisor.stats(&id).unwrap().reason.unwrap().contains("device gone"));
}

#[tokio::test]
async fn test_source_open_failure() {
    let h = harness(worker_settings());
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();

    let err = h.supervisor.start(&id).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Capture { .. }));
    assert_eq!(h.supervisor.stats(&id).unwrap().status, CameraStatus::Failed);

    // Failed cameras can be restarted once the source is back
    h.sources.finite("cam-1", intruder_ticks(1));
    h.supervisor.start(&id).await.unwrap();
    wait_for_status(&h.supervisor, &id, CameraStatus::Stopped).await;
}

// ============================================================================
// Lifecycle and zones
// ============================================================================

#[tokio::test]
async fn test_start_stop_running_camera() {
    let h = harness(worker_settings());
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();
    h.sources.endless("cam-1");

    h.supervisor.start(&id).await.unwrap();
    wait_for_status(&h.supervisor, &id, CameraStatus::Running).await;
    assert!(h.supervisor.is_running(&id));
    // Starting again is a no-op
    h.supervisor.start(&id).await.unwrap();

    h.supervisor.stop(&id).await.unwrap();
    assert!(!h.supervisor.is_running(&id));
    assert_eq!(h.supervisor.stats(&id).unwrap().status, CameraStatus::Stopped);
}

#[tokio::test]
async fn test_runtime_zone_changes_reach_worker() {
    let h = harness(worker_settings());
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();
    h.sources.endless("cam-1");
    h.supervisor.start(&id).await.unwrap();

    let mut annotations = h.supervisor.subscribe(&id).unwrap();
    tokio::time::timeout(Duration::from_secs(2), annotations.wait_for(|a| a.is_some()))
        .await
        .unwrap()
        .unwrap();
    h.supervisor.add_zone(&id, vault()).await.unwrap();

    let found = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            annotations.changed().await.unwrap();
            let names: Vec<String> = annotations
                .borrow()
                .as_ref()
                .map(|a| a.zones.iter().map(|z| z.name.clone()).collect())
                .unwrap_or_default();
            if names.contains(&"vault".to_string()) {
                return names;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(found, vec!["vault".to_string()]);

    assert!(h.supervisor.remove_zone(&id, "vault").await.unwrap());
    assert!(!h.supervisor.remove_zone(&id, "vault").await.unwrap());
    h.supervisor.stop_all().await;
}

#[tokio::test]
async fn test_zone_less_camera_runs_no_zone_rules() {
    let h = harness(worker_settings());
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();
    // 76 s of one person standing still at (500, 500), well past the loitering threshold
    let t0 = Instant::now();
    let spot = Point::new(500.0, 500.0);
    let gap = Duration::from_millis(900);
    let gate = h.sources.gated(
        "cam-1",
        standing_ticks(0..40, spot, t0, gap),
        standing_ticks(40..85, spot, t0, gap),
    );

    h.supervisor.start(&id).await.unwrap();
    let mut annotations = h.supervisor.subscribe(&id).unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        annotations.wait_for(|a| a.as_ref().is_some_and(|a| a.frame_seq == 39)),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(annotations.borrow().as_ref().unwrap().zones.is_empty());

    // A restricted zone far from the person adds no coverage where they stand
    h.supervisor.add_zone(&id, vault()).await.unwrap();
    gate.notify_one();
    wait_for_status(&h.supervisor, &id, CameraStatus::Stopped).await;
    h.alerts.stop().await;

    let last = annotations.borrow().clone().unwrap();
    assert_eq!(last.frame_seq, 84);
    assert_eq!(last.zones.len(), 1);
    assert_eq!(last.zones[0].name, "vault");
    assert!(h.sink.delivered.lock().is_empty());
    assert!(h.supervisor.stats(&id).unwrap().recent_activities.is_empty());
}

#[tokio::test]
async fn test_zone_added_during_capture_applies_to_next_frame() {
    let h = harness(worker_settings());
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted")).unwrap();
    // The tenth tick is the first one analyzed; it is held back until the vault exists
    let t0 = Instant::now();
    let spot = Point::new(50.0, 50.0);
    let gap = Duration::from_millis(100);
    let gate = h.sources.gated(
        "cam-1",
        standing_ticks(0..9, spot, t0, gap),
        standing_ticks(9..10, spot, t0, gap),
    );

    h.supervisor.start(&id).await.unwrap();
    let mut annotations = h.supervisor.subscribe(&id).unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        annotations.wait_for(|a| a.as_ref().is_some_and(|a| a.frame_seq == 8)),
    )
    .await
    .unwrap()
    .unwrap();

    // The worker is parked in capture when the zone arrives
    h.supervisor.add_zone(&id, vault()).await.unwrap();
    gate.notify_one();
    wait_for_status(&h.supervisor, &id, CameraStatus::Stopped).await;
    h.alerts.stop().await;

    let delivered = h.sink.delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].activity.activity_type(), ActivityType::ZoneIntrusion);
    assert_eq!(delivered[0].activity.zone_name, "vault");
    assert_eq!(delivered[0].activity.threat_level, ThreatLevel::Medium);
}

#[tokio::test]
async fn test_zone_and_camera_validation() {
    let h = harness(worker_settings());
    let id = CameraId::from("cam-1");
    h.supervisor.add_camera(CameraConfig::new("cam-1", "scripted").with_zone(vault())).unwrap();

    assert!(matches!(
        h.supervisor.add_camera(CameraConfig::new("cam-1", "other")),
        Err(SupervisorError::DuplicateCamera(_))
    ));
    assert!(matches!(
        h.supervisor.add_zone(&id, vault()).await,
        Err(SupervisorError::InvalidZone { .. })
    ));
    let ghost = CameraId::from("ghost");
    assert!(matches!(
        h.supervisor.add_zone(&ghost, vault()).await,
        Err(SupervisorError::UnknownCamera(_))
    ));
    assert!(matches!(h.supervisor.start(&ghost).await, Err(SupervisorError::UnknownCamera(_))));

    h.supervisor.remove_camera(&id).await.unwrap();
    assert!(h.supervisor.stats(&id).is_none());
    assert!(h.supervisor.camera_ids().is_empty());
}

#[tokio::test]
async fn test_start_all_skips_disabled() {
    let h = harness(worker_settings());
    let mut disabled = CameraConfig::new("cam-b", "scripted");
    disabled.enabled = false;
    h.supervisor.add_camera(CameraConfig::new("cam-a", "scripted")).unwrap();
    h.supervisor.add_camera(disabled).unwrap();
    h.sources.endless("cam-a");
    h.sources.endless("cam-b");

    assert_eq!(h.supervisor.start_all().await, 1);
    assert!(h.supervisor.is_running(&CameraId::from("cam-a")));
    assert!(!h.supervisor.is_running(&CameraId::from("cam-b")));
    h.supervisor.stop_all().await;
    assert!(!h.supervisor.is_running(&CameraId::from("cam-a")));
}

#[tokio::test]
async fn test_reconcile_adds_and_removes() {
    let h = harness(worker_settings());
    h.supervisor.add_camera(CameraConfig::new("cam-a", "scripted")).unwrap();
    h.supervisor.add_camera(CameraConfig::new("cam-keep", "scripted")).unwrap();
    h.sources.endless("cam-a");
    h.sources.endless("cam-keep");
    h.sources.endless("cam-b");
    h.supervisor.start_all().await;

    let desired =
        vec![CameraConfig::new("cam-keep", "scripted"), CameraConfig::new("cam-b", "scripted")];
    let (started, stopped) = h.supervisor.reconcile(desired).await;
    assert_eq!((started, stopped), (1, 1));

    assert_eq!(h.supervisor.camera_ids(), vec![CameraId::from("cam-b"), CameraId::from("cam-keep")]);
    assert!(h.supervisor.is_running(&CameraId::from("cam-b")));
    assert!(h.supervisor.is_running(&CameraId::from("cam-keep")));
    assert!(h.supervisor.stats(&CameraId::from("cam-a")).is_none());
    h.supervisor.stop_all().await;
}
