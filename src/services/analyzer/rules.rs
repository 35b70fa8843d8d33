//! Rule detectors for the ActivityAnalyzer
//!
//! Each rule is independent and reads only the track snapshot, the raw
//! detections and its own bookkeeping.

use super::{ActivityAnalyzer, LoiterState, StationaryObjectState};
use crate::domain::activity::{ActivityEvidence, SuspiciousActivity, ThreatLevel};
use crate::domain::types::{AuthorizationStatus, Detection, Point, Track};
use crate::domain::zone::ZoneType;
use crate::domain::ActivityType;
use crate::services::person_tracker::TrackMap;
use std::time::Instant;
use tracing::debug;

/// Samples used for the running speed estimate
const RUNNING_SAMPLES: usize = 5;

const LOITERING_CONFIDENCE: f64 = 0.8;
const INTRUSION_CONFIDENCE: f64 = 0.9;
const UNAUTHORIZED_CONFIDENCE: f64 = 0.95;
const RUNNING_CONFIDENCE: f64 = 0.7;
const ABANDONED_CONFIDENCE: f64 = 0.7;
const CROWD_CONFIDENCE: f64 = 0.8;

impl ActivityAnalyzer {
    /// Loitering: the track has stayed within `loiter_radius_px` of one spot
    /// inside a loitering zone for at least `loitering_threshold`.
    ///
    /// Dwell is measured in wall-clock time from the first sample at the
    /// current spot, so the result does not depend on the frame rate.
    pub(crate) fn check_loitering(
        &mut self,
        track: &Track,
        now: Instant,
    ) -> Option<SuspiciousActivity> {
        let Some(zone) = self
            .zones
            .iter()
            .find(|z| z.watches(ActivityType::Loitering) && z.contains(&track.center))
        else {
            self.loiter.remove(&track.id);
            return None;
        };
        let zone_name = zone.name().to_string();
        let radius = self.settings.loiter_radius_px;

        let stale = self.loiter.get(&track.id).map_or(true, |s| s.zone != zone_name);
        if stale {
            let first = track.position_history.front()?;
            self.loiter.insert(
                track.id,
                LoiterState {
                    anchor: first.center,
                    since: first.at,
                    last_checked: first.at,
                    zone: zone_name.clone(),
                },
            );
        }
        let state = self.loiter.get_mut(&track.id)?;

        let checked_until = state.last_checked;
        for sample in track.position_history.iter().filter(|s| s.at > checked_until) {
            if sample.center.distance(&state.anchor) > radius {
                state.anchor = sample.center;
                state.since = sample.at;
            }
            state.last_checked = sample.at;
        }

        let dwell = now.saturating_duration_since(state.since);
        if dwell < self.settings.loitering_threshold {
            return None;
        }

        let duration_secs = dwell.as_secs_f64();
        Some(SuspiciousActivity {
            evidence: ActivityEvidence::Loitering { duration_secs, radius_px: radius },
            threat_level: ThreatLevel::Medium,
            track_id: Some(track.id),
            description: format!(
                "Person loitering in '{}' for {:.0} seconds",
                zone_name, duration_secs
            ),
            timestamp: now,
            location: track.center,
            zone_name,
            confidence: LOITERING_CONFIDENCE,
        })
    }

    /// Zone intrusion: a non-authorized track inside a restricted zone,
    /// reported once per (track, zone).
    pub(crate) fn check_zone_intrusion(
        &mut self,
        track: &Track,
        now: Instant,
        out: &mut Vec<SuspiciousActivity>,
    ) {
        if track.authorization_status == AuthorizationStatus::Authorized {
            return;
        }
        for zone in &self.zones {
            if zone.zone_type() != ZoneType::Restricted
                || !zone.watches(ActivityType::ZoneIntrusion)
                || !zone.contains(&track.center)
            {
                continue;
            }
            if !self.intrusions_seen.insert((track.id, zone.name().to_string())) {
                continue;
            }
            let threat_level = if track.authorization_status == AuthorizationStatus::Intruder {
                ThreatLevel::High
            } else {
                ThreatLevel::Medium
            };
            out.push(SuspiciousActivity {
                evidence: ActivityEvidence::ZoneIntrusion {
                    zone_type: zone.zone_type(),
                    authorization: track.authorization_status,
                },
                threat_level,
                track_id: Some(track.id),
                description: format!("Unauthorized entry into restricted zone '{}'", zone.name()),
                timestamp: now,
                location: track.center,
                zone_name: zone.name().to_string(),
                confidence: INTRUSION_CONFIDENCE,
            });
        }
    }

    /// Unauthorized person: a track identified as an intruder, once per track
    pub(crate) fn check_unauthorized(
        &mut self,
        track: &Track,
        now: Instant,
    ) -> Option<SuspiciousActivity> {
        if track.authorization_status != AuthorizationStatus::Intruder {
            return None;
        }
        if !self.unauthorized_seen.insert(track.id) {
            return None;
        }
        Some(SuspiciousActivity {
            evidence: ActivityEvidence::UnauthorizedPerson { identity: track.identity.clone() },
            threat_level: ThreatLevel::High,
            track_id: Some(track.id),
            description: format!("Unauthorized person detected (track {})", track.id),
            timestamp: now,
            location: track.center,
            zone_name: self.zone_name_at(&track.center),
            confidence: UNAUTHORIZED_CONFIDENCE,
        })
    }

    /// Running: path length over the last few samples divided by their span
    pub(crate) fn check_running(&self, track: &Track, now: Instant) -> Option<SuspiciousActivity> {
        let history = &track.position_history;
        if history.len() < RUNNING_SAMPLES {
            return None;
        }
        let recent: Vec<_> = history.iter().skip(history.len() - RUNNING_SAMPLES).collect();
        let elapsed = recent[RUNNING_SAMPLES - 1]
            .at
            .saturating_duration_since(recent[0].at)
            .as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let distance: f64 = recent.windows(2).map(|w| w[0].center.distance(&w[1].center)).sum();
        let speed = distance / elapsed;
        if speed <= self.settings.speed_threshold_px_s {
            return None;
        }
        Some(SuspiciousActivity {
            evidence: ActivityEvidence::Running {
                speed_px_s: speed,
                threshold_px_s: self.settings.speed_threshold_px_s,
            },
            threat_level: ThreatLevel::Low,
            track_id: Some(track.id),
            description: format!("Person running at {:.0} px/s", speed),
            timestamp: now,
            location: track.center,
            zone_name: self.zone_name_at(&track.center),
            confidence: RUNNING_CONFIDENCE,
        })
    }

    /// Weapon co-location: attribute each weapon detection to the nearest
    /// track within `weapon_radius_px`; unattributed weapons are skipped.
    pub(crate) fn check_weapons(
        &self,
        detections: &[Detection],
        tracks: &TrackMap,
        now: Instant,
        out: &mut Vec<SuspiciousActivity>,
    ) {
        for det in detections.iter().filter(|d| d.is_weapon() && d.bbox.is_valid()) {
            let weapon_center = det.bbox.center();
            let mut best_match: Option<(&Track, f64)> = None;
            for track in tracks.values() {
                let dist = weapon_center.distance(&track.center);
                if dist < self.settings.weapon_radius_px
                    && best_match.map_or(true, |(_, best)| dist < best)
                {
                    best_match = Some((track, dist));
                }
            }
            let Some((track, distance_px)) = best_match else {
                debug!(camera = %self.camera_id, class = %det.class_name, "weapon_unattributed");
                continue;
            };
            let weapon_type =
                if det.class_name.is_empty() { "weapon".to_string() } else { det.class_name.clone() };
            out.push(SuspiciousActivity {
                description: format!("{} detected near person (track {})", weapon_type, track.id),
                evidence: ActivityEvidence::WeaponDetected {
                    weapon_type,
                    weapon_confidence: det.confidence,
                    distance_px,
                },
                threat_level: ThreatLevel::Critical,
                track_id: Some(track.id),
                timestamp: now,
                location: weapon_center,
                zone_name: self.zone_name_at(&weapon_center),
                confidence: det.confidence,
            });
        }
    }

    /// Abandoned object: a bag seen at the same grid cell for at least
    /// `abandoned_object_threshold`. One-shot per sighting run.
    pub(crate) fn check_abandoned_objects(
        &mut self,
        detections: &[Detection],
        now: Instant,
        out: &mut Vec<SuspiciousActivity>,
    ) {
        let threshold = self.settings.abandoned_object_threshold;

        for det in detections.iter().filter(|d| d.is_bag() && d.bbox.is_valid()) {
            let center = det.bbox.center();
            let object_id = self.object_id(&center);

            let Some(state) = self.stationary.get_mut(&object_id) else {
                self.stationary.insert(
                    object_id,
                    StationaryObjectState {
                        first_seen: now,
                        last_seen: now,
                        location: center,
                        object_type: det.class_name.clone(),
                    },
                );
                continue;
            };
            state.last_seen = now;

            let stationary = now.saturating_duration_since(state.first_seen);
            if stationary < threshold {
                continue;
            }
            let location = state.location;
            let object_type = state.object_type.clone();
            self.stationary.remove(&object_id);

            let stationary_secs = stationary.as_secs_f64();
            out.push(SuspiciousActivity {
                description: format!(
                    "Unattended {} for {:.0} seconds",
                    if object_type.is_empty() { "object" } else { object_type.as_str() },
                    stationary_secs
                ),
                evidence: ActivityEvidence::AbandonedObject {
                    object_id,
                    object_type,
                    stationary_secs,
                },
                threat_level: ThreatLevel::Medium,
                track_id: None,
                timestamp: now,
                location,
                zone_name: self.zone_name_at(&location),
                confidence: ABANDONED_CONFIDENCE,
            });
        }

        // Forget objects unseen for two thresholds
        let ttl = threshold * 2;
        self.stationary.retain(|_, s| now.saturating_duration_since(s.last_seen) < ttl);
    }

    /// Crowd formation: at least `crowd_threshold` confirmed tracks in view
    pub(crate) fn check_crowd(&self, tracks: &TrackMap, now: Instant) -> Option<SuspiciousActivity> {
        let threshold = self.settings.crowd_threshold;
        if threshold == 0 || tracks.len() < threshold {
            return None;
        }
        let n = tracks.len() as f64;
        let (sx, sy) = tracks.values().fold((0.0, 0.0), |(x, y), t| (x + t.center.x, y + t.center.y));
        let centroid = Point::new(sx / n, sy / n);
        Some(SuspiciousActivity {
            evidence: ActivityEvidence::CrowdFormation { person_count: tracks.len(), threshold },
            threat_level: ThreatLevel::Medium,
            track_id: None,
            description: format!("Crowd of {} people detected", tracks.len()),
            timestamp: now,
            location: centroid,
            zone_name: self.zone_name_at(&centroid),
            confidence: CROWD_CONFIDENCE,
        })
    }

    /// Coarse location key: center snapped to the object grid
    pub(crate) fn object_id(&self, center: &Point) -> String {
        let grid = self.settings.object_grid_px;
        format!("bag_{}_{}", (center.x / grid).round() as i64, (center.y / grid).round() as i64)
    }
}
