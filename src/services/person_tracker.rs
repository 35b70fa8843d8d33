//! Track store: associates per-frame person detections into durable tracks
//!
//! Each tick runs four steps in order:
//! 1. Advance every live track through its per-object tracker
//! 2. Greedily associate detections to tracks by IoU
//! 3. Start new tracks for unmatched detections, up to `max_tracks`
//! 4. Evict tracks whose tracker failed or that went stale
//!
//! Only confirmed tracks (`frame_count >= min_track_length`) are returned.

use crate::domain::types::{
    AuthorizationStatus, CameraId, Detection, FaceVerdict, Frame, Track, TrackId,
};
use crate::infra::config::TrackerSettings;
use crate::services::object_tracker::{ObjectTracker, TrackerFactory};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Snapshot of confirmed tracks keyed by id (ascending = creation order)
pub type TrackMap = BTreeMap<TrackId, Track>;

struct LiveTrack {
    track: Track,
    tracker: Box<dyn ObjectTracker>,
}

pub struct PersonTracker {
    camera_id: CameraId,
    settings: TrackerSettings,
    factory: Arc<dyn TrackerFactory>,
    live: BTreeMap<TrackId, LiveTrack>,
    next_id: u64,
}

impl PersonTracker {
    pub fn new(
        camera_id: CameraId,
        settings: TrackerSettings,
        factory: Arc<dyn TrackerFactory>,
    ) -> Self {
        Self { camera_id, settings, factory, live: BTreeMap::new(), next_id: 1 }
    }

    /// Run one tick and return the confirmed tracks
    pub fn update(&mut self, frame: &Frame, detections: &[Detection]) -> TrackMap {
        let now = frame.captured_at;
        let mut ended: Vec<(TrackId, &'static str)> = Vec::new();

        // Step 1: advance trackers; a stale track is not worth re-locating
        for (id, live) in self.live.iter_mut() {
            if now.saturating_duration_since(live.track.last_update_at) > self.settings.track_timeout
            {
                ended.push((*id, "timeout"));
                continue;
            }
            match live.tracker.update(frame) {
                Some(bbox) if bbox.is_valid() => {
                    live.track.advance(bbox, now, self.settings.history_window);
                }
                _ => ended.push((*id, "tracker_lost")),
            }
        }
        for (id, reason) in &ended {
            self.live.remove(id);
            debug!(camera = %self.camera_id, track_id = %id, reason = %reason, "track_ended");
        }

        // Step 2: greedy association in track creation order
        let candidates: Vec<&Detection> =
            detections.iter().filter(|d| d.bbox.is_valid()).collect();
        let mut used = vec![false; candidates.len()];
        for live in self.live.values_mut() {
            let mut best_match: Option<(usize, f64)> = None;
            for (i, det) in candidates.iter().enumerate() {
                if used[i] {
                    continue;
                }
                let iou = live.track.bbox.iou(&det.bbox);
                if iou > self.settings.iou_threshold && best_match.map_or(true, |(_, b)| iou > b) {
                    best_match = Some((i, iou));
                }
            }
            if let Some((i, _)) = best_match {
                used[i] = true;
                live.track.confidence = candidates[i].confidence;
                live.tracker.observe(candidates[i].bbox);
            }
        }

        // Step 3: new tracks for unmatched detections
        let mut dropped = 0usize;
        for (i, det) in candidates.iter().enumerate() {
            if used[i] {
                continue;
            }
            if self.live.len() >= self.settings.max_tracks {
                dropped += 1;
                continue;
            }
            let mut tracker = self.factory.create();
            if !tracker.init(frame, det.bbox) {
                debug!(camera = %self.camera_id, "tracker_init_failed");
                continue;
            }
            let id = TrackId(self.next_id);
            self.next_id += 1;
            self.live.insert(id, LiveTrack { track: Track::new(id, det.bbox, det.confidence, now), tracker });
            info!(
                camera = %self.camera_id,
                track_id = %id,
                confidence = format!("{:.2}", det.confidence),
                "track_created"
            );
        }
        if dropped > 0 {
            debug!(
                camera = %self.camera_id,
                dropped = %dropped,
                max_tracks = %self.settings.max_tracks,
                "track_capacity_reached"
            );
        }

        // Step 4: time-based eviction
        let timeout = self.settings.track_timeout;
        let camera_id = &self.camera_id;
        self.live.retain(|id, live| {
            let keep = now.saturating_duration_since(live.track.last_update_at) <= timeout;
            if !keep {
                debug!(camera = %camera_id, track_id = %id, reason = "timeout", "track_ended");
            }
            keep
        });

        self.confirmed_tracks()
    }

    /// Attach face verdicts to the confirmed track containing each face center
    ///
    /// When several tracks contain the center, the one overlapping the face
    /// most wins. Returns how many verdicts were attached. Tracks in
    /// `snapshot` are updated alongside the store.
    pub fn assign_identities(&mut self, faces: &[FaceVerdict], snapshot: &mut TrackMap) -> usize {
        let min = self.settings.min_track_length;
        let mut assigned = 0;
        for face in faces {
            if !face.bbox.is_valid() {
                continue;
            }
            let center = face.bbox.center();

            let mut best_match: Option<(TrackId, f64)> = None;
            for (id, live) in &self.live {
                if !live.track.is_confirmed(min) || !live.track.bbox.contains(&center) {
                    continue;
                }
                let overlap = live.track.bbox.intersection_area(&face.bbox);
                if best_match.map_or(true, |(_, b)| overlap > b) {
                    best_match = Some((*id, overlap));
                }
            }

            let Some((id, _)) = best_match else {
                continue;
            };
            let status = if face.is_authorized {
                AuthorizationStatus::Authorized
            } else {
                AuthorizationStatus::Intruder
            };
            if let Some(live) = self.live.get_mut(&id) {
                apply_identity(&mut live.track, &face.name, status);
            }
            if let Some(track) = snapshot.get_mut(&id) {
                apply_identity(track, &face.name, status);
            }
            assigned += 1;
        }
        assigned
    }

    pub fn confirmed_tracks(&self) -> TrackMap {
        let min = self.settings.min_track_length;
        self.live
            .iter()
            .filter(|(_, live)| live.track.is_confirmed(min))
            .map(|(id, live)| (*id, live.track.clone()))
            .collect()
    }

    /// Number of live tracks, confirmed or not
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn clear(&mut self) {
        self.live.clear();
    }
}

fn apply_identity(track: &mut Track, name: &str, status: AuthorizationStatus) {
    if track.authorization_status != status || track.identity != name {
        debug!(track_id = %track.id, identity = %name, status = %status, "track_identity_updated");
    }
    track.identity = name.to_string();
    track.authorization_status = status;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BoundingBox;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    /// Tracker that holds its box and can be told to fail
    struct ScriptedTracker {
        bbox: BoundingBox,
        fail: Arc<Mutex<bool>>,
    }

    impl ObjectTracker for ScriptedTracker {
        fn init(&mut self, _frame: &Frame, bbox: BoundingBox) -> bool {
            self.bbox = bbox;
            true
        }

        fn update(&mut self, _frame: &Frame) -> Option<BoundingBox> {
            if *self.fail.lock() {
                None
            } else {
                Some(self.bbox)
            }
        }

        fn observe(&mut self, bbox: BoundingBox) {
            self.bbox = bbox;
        }
    }

    #[derive(Default)]
    struct ScriptedFactory {
        fail: Arc<Mutex<bool>>,
    }

    impl TrackerFactory for ScriptedFactory {
        fn create(&self) -> Box<dyn ObjectTracker> {
            Box::new(ScriptedTracker { bbox: BoundingBox::default(), fail: self.fail.clone() })
        }
    }

    struct Harness {
        tracker: PersonTracker,
        fail: Arc<Mutex<bool>>,
        t0: Instant,
        seq: u64,
    }

    impl Harness {
        fn new(settings: TrackerSettings) -> Self {
            let factory = ScriptedFactory::default();
            let fail = factory.fail.clone();
            Self {
                tracker: PersonTracker::new(CameraId::from("cam"), settings, Arc::new(factory)),
                fail,
                t0: Instant::now(),
                seq: 0,
            }
        }

        fn tick(&mut self, at_ms: u64, detections: &[Detection]) -> TrackMap {
            self.seq += 1;
            let frame = Frame::new(self.seq, self.t0 + Duration::from_millis(at_ms));
            self.tracker.update(&frame, detections)
        }
    }

    fn person(x1: f64, y1: f64, x2: f64, y2: f64) -> Detection {
        Detection::person(BoundingBox::new(x1, y1, x2, y2), 0.9)
    }

    #[test]
    fn test_track_confirmed_after_min_length() {
        let mut h = Harness::new(TrackerSettings::default());
        let det = person(100.0, 100.0, 150.0, 250.0);

        // frame_count reaches 5 on the fifth tick
        for i in 0..4 {
            let out = h.tick(i * 100, &[det.clone()]);
            assert!(out.is_empty(), "tick {i} should not confirm");
        }
        let out = h.tick(400, &[det.clone()]);
        assert_eq!(out.len(), 1);
        let track = out.values().next().unwrap();
        assert_eq!(track.id, TrackId(1));
        assert_eq!(track.frame_count, 5);
        assert_eq!(track.identity, "unknown");
        assert_eq!(track.authorization_status, AuthorizationStatus::Pending);
    }

    #[test]
    fn test_matched_detection_does_not_spawn_track() {
        let mut h = Harness::new(TrackerSettings::default());
        h.tick(0, &[person(100.0, 100.0, 150.0, 250.0)]);
        // Shifted by 5px: IoU well above 0.5
        h.tick(100, &[person(105.0, 100.0, 155.0, 250.0)]);
        assert_eq!(h.tracker.live_count(), 1);
    }

    #[test]
    fn test_low_iou_detection_never_matches() {
        let mut h = Harness::new(TrackerSettings::default());
        h.tick(0, &[person(0.0, 0.0, 10.0, 10.0)]);
        // IoU with the existing box is 1/3, below threshold
        h.tick(100, &[Detection { confidence: 0.4, ..person(5.0, 0.0, 15.0, 10.0) }]);
        assert_eq!(h.tracker.live_count(), 2);
        let first = &h.tracker.live[&TrackId(1)].track;
        assert_eq!(first.confidence, 0.9);
    }

    #[test]
    fn test_confidence_updated_on_match() {
        let mut h = Harness::new(TrackerSettings::default());
        h.tick(0, &[person(0.0, 0.0, 100.0, 100.0)]);
        h.tick(100, &[Detection { confidence: 0.55, ..person(2.0, 0.0, 102.0, 100.0) }]);
        assert_eq!(h.tracker.live[&TrackId(1)].track.confidence, 0.55);
    }

    #[test]
    fn test_greedy_one_detection_per_track() {
        let mut h = Harness::new(TrackerSettings::default());
        h.tick(0, &[person(0.0, 0.0, 100.0, 100.0), person(300.0, 0.0, 400.0, 100.0)]);
        assert_eq!(h.tracker.live_count(), 2);
        // Both detections near track 1; track 1 takes the better one, the other spawns
        h.tick(
            100,
            &[person(1.0, 0.0, 101.0, 100.0), person(10.0, 0.0, 110.0, 100.0)],
        );
        assert_eq!(h.tracker.live_count(), 3);
    }

    #[test]
    fn test_invalid_detections_ignored() {
        let mut h = Harness::new(TrackerSettings::default());
        h.tick(0, &[person(10.0, 10.0, 10.0, 50.0), person(f64::NAN, 0.0, 1.0, 1.0)]);
        assert_eq!(h.tracker.live_count(), 0);
    }

    #[test]
    fn test_max_tracks_drops_excess() {
        let settings = TrackerSettings { max_tracks: 2, ..Default::default() };
        let mut h = Harness::new(settings);
        let dets: Vec<Detection> =
            (0..4).map(|i| person(i as f64 * 200.0, 0.0, i as f64 * 200.0 + 50.0, 100.0)).collect();
        h.tick(0, &dets);
        assert_eq!(h.tracker.live_count(), 2);
        h.tick(100, &dets);
        assert_eq!(h.tracker.live_count(), 2);
    }

    #[test]
    fn test_tracker_failure_removes_track() {
        let mut h = Harness::new(TrackerSettings::default());
        let det = person(0.0, 0.0, 50.0, 100.0);
        for i in 0..6 {
            h.tick(i * 100, &[det.clone()]);
        }
        assert_eq!(h.tracker.confirmed_tracks().len(), 1);

        *h.fail.lock() = true;
        let out = h.tick(700, &[]);
        assert!(out.is_empty());
        assert_eq!(h.tracker.live_count(), 0);
    }

    #[test]
    fn test_stale_track_absent_after_timeout() {
        let mut h = Harness::new(TrackerSettings::default());
        let det = person(0.0, 0.0, 50.0, 100.0);
        for i in 0..6 {
            h.tick(i * 100, &[det.clone()]);
        }
        assert_eq!(h.tracker.confirmed_tracks().len(), 1);

        // No update for 5.5 s (> 5 s timeout)
        let out = h.tick(500 + 5_500, &[]);
        assert!(out.is_empty());
        assert_eq!(h.tracker.live_count(), 0);
    }

    #[test]
    fn test_ids_monotonic() {
        let mut h = Harness::new(TrackerSettings::default());
        h.tick(0, &[person(0.0, 0.0, 50.0, 100.0)]);
        *h.fail.lock() = true;
        h.tick(100, &[]);
        *h.fail.lock() = false;
        h.tick(200, &[person(0.0, 0.0, 50.0, 100.0)]);
        assert!(h.tracker.live.contains_key(&TrackId(2)));
        assert!(!h.tracker.live.contains_key(&TrackId(1)));
    }

    #[test]
    fn test_assign_identities() {
        let mut h = Harness::new(TrackerSettings { min_track_length: 1, ..Default::default() });
        let mut snapshot =
            h.tick(0, &[person(0.0, 0.0, 100.0, 200.0), person(300.0, 0.0, 400.0, 200.0)]);
        let faces = vec![
            FaceVerdict {
                name: "alice".to_string(),
                bbox: BoundingBox::new(30.0, 10.0, 70.0, 50.0),
                is_authorized: true,
            },
            FaceVerdict {
                name: "unknown".to_string(),
                bbox: BoundingBox::new(330.0, 10.0, 370.0, 50.0),
                is_authorized: false,
            },
            // Face outside every track is ignored
            FaceVerdict {
                name: "ghost".to_string(),
                bbox: BoundingBox::new(900.0, 900.0, 920.0, 920.0),
                is_authorized: true,
            },
        ];

        assert_eq!(h.tracker.assign_identities(&faces, &mut snapshot), 2);
        assert_eq!(snapshot[&TrackId(1)].identity, "alice");
        assert_eq!(snapshot[&TrackId(1)].authorization_status, AuthorizationStatus::Authorized);
        assert_eq!(snapshot[&TrackId(2)].authorization_status, AuthorizationStatus::Intruder);

        // Store keeps the identity for the next tick
        let next = h.tick(100, &[]);
        assert_eq!(next[&TrackId(1)].identity, "alice");
    }

    fn face(name: &str, bbox: BoundingBox) -> FaceVerdict {
        FaceVerdict { name: name.to_string(), bbox, is_authorized: true }
    }

    #[test]
    fn test_identity_goes_to_largest_overlap() {
        let mut h = Harness::new(TrackerSettings { min_track_length: 1, ..Default::default() });
        // IoU 0.25: two tracks whose boxes overlap in x 60..100
        let mut snapshot =
            h.tick(0, &[person(0.0, 0.0, 100.0, 200.0), person(60.0, 0.0, 160.0, 200.0)]);
        assert_eq!(snapshot.len(), 2);

        // Both faces have their center inside both tracks
        let faces = vec![
            face("left", BoundingBox::new(50.0, 10.0, 90.0, 50.0)),
            face("right", BoundingBox::new(70.0, 10.0, 110.0, 50.0)),
        ];
        assert_eq!(h.tracker.assign_identities(&faces, &mut snapshot), 2);
        assert_eq!(snapshot[&TrackId(1)].identity, "left");
        assert_eq!(snapshot[&TrackId(2)].identity, "right");
    }

    #[test]
    fn test_identity_skips_unconfirmed_tracks() {
        let mut h = Harness::new(TrackerSettings { min_track_length: 2, ..Default::default() });
        let known = person(0.0, 0.0, 100.0, 200.0);
        h.tick(0, &[known.clone()]);
        // Track 2 is one frame old and overlaps the face more than track 1
        let mut snapshot = h.tick(100, &[known, person(40.0, 0.0, 140.0, 200.0)]);
        assert_eq!(snapshot.keys().copied().collect::<Vec<_>>(), vec![TrackId(1)]);

        let faces = vec![face("bob", BoundingBox::new(70.0, 10.0, 110.0, 50.0))];
        assert_eq!(h.tracker.assign_identities(&faces, &mut snapshot), 1);
        assert_eq!(snapshot[&TrackId(1)].identity, "bob");
        assert_eq!(h.tracker.live[&TrackId(2)].track.identity, "unknown");

        // Nothing confirmed contains the face: no assignment
        let lone = vec![face("carol", BoundingBox::new(120.0, 10.0, 140.0, 50.0))];
        assert_eq!(h.tracker.assign_identities(&lone, &mut snapshot), 0);
    }
}
