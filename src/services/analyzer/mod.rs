//! Suspicious activity analysis over confirmed tracks
//!
//! The analyzer runs independent rules every tick:
//! - Per track: loitering, restricted-zone intrusion, unauthorized person, running
//! - Per detection: weapon co-location, abandoned objects
//! - Per tick: crowd formation
//!
//! It keeps the dedup sets and dwell state the rules need between ticks and a
//! bounded history of everything it emitted. One instance belongs to one
//! camera worker.

mod rules;

use crate::domain::activity::{SuspiciousActivity, UNKNOWN_AREA};
use crate::domain::types::{CameraId, Detection, Point, TrackId};
use crate::domain::zone::{DetectionZone, ZoneError};
use crate::infra::config::AnalyzerSettings;
use crate::services::person_tracker::TrackMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Dwell bookkeeping for the loitering rule
#[derive(Debug, Clone)]
pub(crate) struct LoiterState {
    /// Position every later sample is compared against
    pub(crate) anchor: Point,
    /// When the track settled at `anchor`
    pub(crate) since: Instant,
    /// Newest history sample already folded in
    pub(crate) last_checked: Instant,
    pub(crate) zone: String,
}

/// Bookkeeping for a bag seen at roughly the same place
#[derive(Debug, Clone)]
pub struct StationaryObjectState {
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub location: Point,
    pub object_type: String,
}

pub struct ActivityAnalyzer {
    pub(crate) camera_id: CameraId,
    pub(crate) settings: AnalyzerSettings,
    pub(crate) zones: Vec<DetectionZone>,
    /// (track, zone) pairs that already raised an intrusion
    pub(crate) intrusions_seen: FxHashSet<(TrackId, String)>,
    /// Tracks that already raised an unauthorized-person event
    pub(crate) unauthorized_seen: FxHashSet<TrackId>,
    pub(crate) loiter: FxHashMap<TrackId, LoiterState>,
    pub(crate) stationary: FxHashMap<String, StationaryObjectState>,
    pub(crate) history: VecDeque<SuspiciousActivity>,
}

impl ActivityAnalyzer {
    pub fn new(camera_id: CameraId, settings: AnalyzerSettings) -> Self {
        Self {
            camera_id,
            settings,
            zones: Vec::new(),
            intrusions_seen: FxHashSet::default(),
            unauthorized_seen: FxHashSet::default(),
            loiter: FxHashMap::default(),
            stationary: FxHashMap::default(),
            history: VecDeque::new(),
        }
    }

    /// Add a zone; names are unique per analyzer
    pub fn add_zone(&mut self, zone: DetectionZone) -> Result<(), ZoneError> {
        if self.zones.iter().any(|z| z.name() == zone.name()) {
            return Err(ZoneError::Duplicate(zone.name().to_string()));
        }
        info!(
            camera = %self.camera_id,
            zone = %zone.name(),
            zone_type = %zone.zone_type().as_str(),
            "zone_added"
        );
        self.zones.push(zone);
        Ok(())
    }

    /// Insert or overwrite a zone by name
    pub fn replace_zone(&mut self, zone: DetectionZone) {
        self.remove_zone(zone.name());
        self.zones.push(zone);
    }

    /// Remove a zone by name; dedup state tied to it is dropped too
    pub fn remove_zone(&mut self, name: &str) -> bool {
        let before = self.zones.len();
        self.zones.retain(|z| z.name() != name);
        if self.zones.len() == before {
            return false;
        }
        self.intrusions_seen.retain(|(_, zone)| zone != name);
        self.loiter.retain(|_, s| s.zone != name);
        info!(camera = %self.camera_id, zone = %name, "zone_removed");
        true
    }

    pub fn zones(&self) -> &[DetectionZone] {
        &self.zones
    }

    /// Evaluate every rule for one tick
    pub fn analyze_frame(
        &mut self,
        detections: &[Detection],
        tracks: &TrackMap,
        now: Instant,
    ) -> Vec<SuspiciousActivity> {
        let mut activities = Vec::new();

        for track in tracks.values() {
            if track.frame_count < self.settings.min_analysis_frames {
                continue;
            }
            if let Some(a) = self.check_loitering(track, now) {
                activities.push(a);
            }
            self.check_zone_intrusion(track, now, &mut activities);
            if let Some(a) = self.check_unauthorized(track, now) {
                activities.push(a);
            }
            if let Some(a) = self.check_running(track, now) {
                activities.push(a);
            }
        }

        self.check_weapons(detections, tracks, now, &mut activities);
        self.check_abandoned_objects(detections, now, &mut activities);
        if let Some(a) = self.check_crowd(tracks, now) {
            activities.push(a);
        }

        self.prune_departed(tracks);

        for activity in &activities {
            info!(
                camera = %self.camera_id,
                activity = %activity.activity_type(),
                threat = %activity.threat_level.as_str(),
                track_id = ?activity.track_id.map(|t| t.0),
                zone = %activity.zone_name,
                confidence = format!("{:.2}", activity.confidence),
                "suspicious_activity"
            );
            self.record(activity.clone());
        }

        activities
    }

    /// Activities emitted within `window` before `now`, oldest first
    pub fn recent_activities(&self, window: Duration, now: Instant) -> Vec<SuspiciousActivity> {
        self.history
            .iter()
            .filter(|a| now.saturating_duration_since(a.timestamp) <= window)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// First zone containing `p`, if any
    pub(crate) fn zone_name_at(&self, p: &Point) -> String {
        self.zones
            .iter()
            .find(|z| z.contains(p))
            .map(|z| z.name().to_string())
            .unwrap_or_else(|| UNKNOWN_AREA.to_string())
    }

    fn record(&mut self, activity: SuspiciousActivity) {
        if self.settings.history_capacity == 0 {
            return;
        }
        while self.history.len() >= self.settings.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(activity);
    }

    /// Forget per-track state for tracks that left the store
    fn prune_departed(&mut self, tracks: &TrackMap) {
        let before = self.loiter.len() + self.intrusions_seen.len() + self.unauthorized_seen.len();
        self.loiter.retain(|id, _| tracks.contains_key(id));
        self.intrusions_seen.retain(|(id, _)| tracks.contains_key(id));
        self.unauthorized_seen.retain(|id| tracks.contains_key(id));
        let after = self.loiter.len() + self.intrusions_seen.len() + self.unauthorized_seen.len();
        if after < before {
            debug!(camera = %self.camera_id, pruned = %(before - after), "analyzer_state_pruned");
        }
    }
}
