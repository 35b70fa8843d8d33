//! Per-camera stats registry
//!
//! Workers write their own `CameraStats` entry through an `Arc` handed out at
//! registration, so the map lock is only taken to add, remove or list cameras.
//! Counters are Relaxed atomics; status and the activity log sit behind small
//! per-entry mutexes.

use crate::domain::activity::{ActivityType, SuspiciousActivity, ThreatLevel};
use crate::domain::types::{epoch_ms, CameraId, CameraStatus, TrackId};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Compact record of an activity kept in the per-camera log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityLogEntry {
    pub activity_type: ActivityType,
    pub threat_level: ThreatLevel,
    pub track_id: Option<TrackId>,
    pub zone_name: String,
    pub description: String,
    pub epoch_ms: u64,
}

impl From<&SuspiciousActivity> for ActivityLogEntry {
    fn from(a: &SuspiciousActivity) -> Self {
        Self {
            activity_type: a.activity_type(),
            threat_level: a.threat_level,
            track_id: a.track_id,
            zone_name: a.zone_name.clone(),
            description: a.description.clone(),
            epoch_ms: epoch_ms(),
        }
    }
}

#[derive(Debug, Default)]
struct StatusCell {
    status: CameraStatus,
    reason: Option<String>,
}

/// Live counters for one camera
#[derive(Debug)]
pub struct CameraStats {
    status: Mutex<StatusCell>,
    frames_processed: AtomicU64,
    frames_analyzed: AtomicU64,
    total_detections: AtomicU64,
    active_tracks: AtomicU64,
    capture_failures: AtomicU64,
    /// Frames per second scaled by 1000
    fps_milli: AtomicU64,
    activity_log: Mutex<VecDeque<ActivityLogEntry>>,
    activity_log_capacity: usize,
}

impl CameraStats {
    pub fn new(activity_log_capacity: usize) -> Self {
        Self {
            status: Mutex::new(StatusCell::default()),
            frames_processed: AtomicU64::new(0),
            frames_analyzed: AtomicU64::new(0),
            total_detections: AtomicU64::new(0),
            active_tracks: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
            fps_milli: AtomicU64::new(0),
            activity_log: Mutex::new(VecDeque::new()),
            activity_log_capacity,
        }
    }

    pub fn status(&self) -> CameraStatus {
        self.status.lock().status
    }

    /// Apply a lifecycle transition; illegal edges are refused and reported
    pub fn transition(&self, next: CameraStatus, reason: Option<String>) -> bool {
        let mut cell = self.status.lock();
        if cell.status == next || !cell.status.can_transition_to(next) {
            return false;
        }
        cell.status = next;
        cell.reason = reason;
        true
    }

    pub fn record_frame(&self, detections: usize) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.total_detections.fetch_add(detections as u64, Ordering::Relaxed);
    }

    pub fn record_analysis(&self, active_tracks: usize) {
        self.frames_analyzed.fetch_add(1, Ordering::Relaxed);
        self.active_tracks.store(active_tracks as u64, Ordering::Relaxed);
    }

    /// Worker exited; its tracks are gone
    pub fn clear_active_tracks(&self) {
        self.active_tracks.store(0, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_fps(&self, fps: f64) {
        self.fps_milli.store((fps.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn active_tracks(&self) -> u64 {
        self.active_tracks.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn push_activity(&self, entry: ActivityLogEntry) {
        if self.activity_log_capacity == 0 {
            return;
        }
        let mut log = self.activity_log.lock();
        while log.len() >= self.activity_log_capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    pub fn snapshot(&self, camera_id: &CameraId) -> CameraStatsSnapshot {
        let (status, reason) = {
            let cell = self.status.lock();
            (cell.status, cell.reason.clone())
        };
        CameraStatsSnapshot {
            camera_id: camera_id.clone(),
            status,
            reason,
            fps: self.fps_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            total_detections: self.total_detections.load(Ordering::Relaxed),
            active_tracks: self.active_tracks.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            recent_activities: self.activity_log.lock().iter().cloned().collect(),
        }
    }
}

/// Point-in-time copy of a camera's stats
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatsSnapshot {
    pub camera_id: CameraId,
    pub status: CameraStatus,
    pub reason: Option<String>,
    pub fps: f64,
    pub frames_processed: u64,
    pub frames_analyzed: u64,
    pub total_detections: u64,
    pub active_tracks: u64,
    pub capture_failures: u64,
    pub recent_activities: Vec<ActivityLogEntry>,
}

/// Concurrent map of camera id to stats entry
#[derive(Debug, Default)]
pub struct StatsRegistry {
    cameras: RwLock<FxHashMap<CameraId, Arc<CameraStats>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing entry or create one
    pub fn register(&self, id: &CameraId, activity_log_capacity: usize) -> Arc<CameraStats> {
        if let Some(stats) = self.cameras.read().get(id) {
            return stats.clone();
        }
        self.cameras
            .write()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(CameraStats::new(activity_log_capacity)))
            .clone()
    }

    pub fn get(&self, id: &CameraId) -> Option<Arc<CameraStats>> {
        self.cameras.read().get(id).cloned()
    }

    pub fn remove(&self, id: &CameraId) -> Option<Arc<CameraStats>> {
        self.cameras.write().remove(id)
    }

    pub fn snapshot(&self, id: &CameraId) -> Option<CameraStatsSnapshot> {
        self.get(id).map(|s| s.snapshot(id))
    }

    /// Snapshots of every camera, sorted by id
    pub fn snapshot_all(&self) -> Vec<CameraStatsSnapshot> {
        let entries: Vec<(CameraId, Arc<CameraStats>)> =
            self.cameras.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut out: Vec<CameraStatsSnapshot> =
            entries.iter().map(|(id, stats)| stats.snapshot(id)).collect();
        out.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        out
    }

    pub fn count_in(&self, status: CameraStatus) -> usize {
        self.cameras.read().values().filter(|s| s.status() == status).count()
    }

    pub fn total_active_tracks(&self) -> u64 {
        self.cameras.read().values().map(|s| s.active_tracks()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u64) -> ActivityLogEntry {
        ActivityLogEntry {
            activity_type: ActivityType::Running,
            threat_level: ThreatLevel::Low,
            track_id: Some(TrackId(n)),
            zone_name: "lobby".to_string(),
            description: format!("run {n}"),
            epoch_ms: n,
        }
    }

    #[test]
    fn test_transition_rules() {
        let stats = CameraStats::new(10);
        assert_eq!(stats.status(), CameraStatus::Stopped);
        assert!(!stats.transition(CameraStatus::Running, None));
        assert!(stats.transition(CameraStatus::Starting, None));
        assert!(stats.transition(CameraStatus::Running, None));
        assert!(stats.transition(CameraStatus::Failed, Some("capture lost".into())));

        let snap = stats.snapshot(&CameraId::from("c1"));
        assert_eq!(snap.status, CameraStatus::Failed);
        assert_eq!(snap.reason.as_deref(), Some("capture lost"));
    }

    #[test]
    fn test_activity_log_bounded() {
        let stats = CameraStats::new(3);
        for n in 0..5 {
            stats.push_activity(entry(n));
        }
        let snap = stats.snapshot(&CameraId::from("c1"));
        let ids: Vec<u64> = snap.recent_activities.iter().map(|e| e.epoch_ms).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_registry_register_is_idempotent() {
        let registry = StatsRegistry::new();
        let id = CameraId::from("c1");
        let a = registry.register(&id, 10);
        let b = registry.register(&id, 10);
        assert!(Arc::ptr_eq(&a, &b));
        a.record_frame(4);
        assert_eq!(registry.snapshot(&id).unwrap().total_detections, 4);
        assert!(registry.remove(&id).is_some());
        assert!(registry.snapshot(&id).is_none());
    }

    #[test]
    fn test_snapshot_all_sorted() {
        let registry = StatsRegistry::new();
        registry.register(&CameraId::from("b"), 1).record_analysis(2);
        registry.register(&CameraId::from("a"), 1).record_analysis(3);
        let all = registry.snapshot_all();
        assert_eq!(all[0].camera_id, CameraId::from("a"));
        assert_eq!(all[1].camera_id, CameraId::from("b"));
        assert_eq!(registry.total_active_tracks(), 5);
    }

    #[test]
    fn test_concurrent_writers() {
        use std::thread;

        let registry = Arc::new(StatsRegistry::new());
        let mut handles = vec![];
        for i in 0..4 {
            let r = registry.clone();
            handles.push(thread::spawn(move || {
                let stats = r.register(&CameraId(format!("cam{i}")), 5);
                for _ in 0..1000 {
                    stats.record_frame(1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let all = registry.snapshot_all();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|s| s.frames_processed == 1000));
    }
}
