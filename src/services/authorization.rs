//! Per-camera memory of the last authorized sighting
//!
//! Bridges short gaps in face recognition: a person whose face was just
//! confirmed as authorized does not trigger an intruder alert when the face
//! is briefly lost to a pose change or occlusion. Faces recognized as
//! intruders always alert.

use crate::domain::activity::{ActivityEvidence, IntruderReason, SuspiciousActivity, ThreatLevel};
use crate::domain::types::{FaceVerdict, Point};
use std::time::Instant;
use tracing::debug;

const INTRUDER_CONFIDENCE: f64 = 0.9;

/// Last authorized sighting
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizedSighting {
    pub names: Vec<String>,
    pub last_seen_at: Instant,
    pub frames_since_seen: u32,
}

/// Alert decision produced by the memory
#[derive(Debug, Clone, PartialEq)]
pub struct IntruderAlert {
    pub reason: IntruderReason,
    pub names: Vec<String>,
    /// Center of the first intruder face, when one was seen
    pub location: Option<Point>,
}

impl IntruderAlert {
    /// Turn the decision into an activity; `fallback` locates face-hidden alerts
    pub fn into_activity(self, fallback: Point, zone_name: String, now: Instant) -> SuspiciousActivity {
        let description = match self.reason {
            IntruderReason::UnknownFace => {
                format!("Unauthorized face detected: {}", self.names.join(", "))
            }
            IntruderReason::FaceHidden => format!(
                "Person present without a recognizable face (last authorized: {})",
                if self.names.is_empty() { "none".to_string() } else { self.names.join(", ") }
            ),
        };
        SuspiciousActivity {
            location: self.location.unwrap_or(fallback),
            evidence: ActivityEvidence::Intruder { reason: self.reason, names: self.names },
            threat_level: ThreatLevel::High,
            track_id: None,
            description,
            timestamp: now,
            zone_name,
            confidence: INTRUDER_CONFIDENCE,
        }
    }
}

#[derive(Debug)]
pub struct AuthorizationMemory {
    last_authorized: Option<AuthorizedSighting>,
    max_frames_without_face: u32,
}

impl AuthorizationMemory {
    pub fn new(max_frames_without_face: u32) -> Self {
        Self { last_authorized: None, max_frames_without_face }
    }

    pub fn last_authorized(&self) -> Option<&AuthorizedSighting> {
        self.last_authorized.as_ref()
    }

    /// Fold one tick into the memory.
    ///
    /// - Authorized faces overwrite the memory and reset the gap counter.
    /// - Intruder faces alert on the same tick regardless of the memory. With
    ///   no authorized face beside them they also clear the memory.
    /// - A person with no face at all counts as a gap tick; the alert fires
    ///   on the `max_frames_without_face`-th consecutive gap and clears the
    ///   memory.
    pub fn observe(
        &mut self,
        person_present: bool,
        faces: &[FaceVerdict],
        now: Instant,
    ) -> Option<IntruderAlert> {
        let authorized: Vec<String> =
            faces.iter().filter(|f| f.is_authorized).map(|f| f.name.clone()).collect();
        if !authorized.is_empty() {
            self.last_authorized =
                Some(AuthorizedSighting { names: authorized.clone(), last_seen_at: now, frames_since_seen: 0 });
        }

        let intruders: Vec<&FaceVerdict> = faces.iter().filter(|f| !f.is_authorized).collect();
        if !intruders.is_empty() {
            if authorized.is_empty() && self.last_authorized.take().is_some() {
                debug!("authorization_memory_cleared_by_intruder");
            }
            return Some(IntruderAlert {
                reason: IntruderReason::UnknownFace,
                names: intruders.iter().map(|f| f.name.clone()).collect(),
                location: Some(intruders[0].bbox.center()),
            });
        }

        if !faces.is_empty() || !person_present {
            return None;
        }

        let sighting = self.last_authorized.as_mut()?;
        sighting.frames_since_seen += 1;
        if sighting.frames_since_seen < self.max_frames_without_face {
            debug!(
                frames_since_seen = %sighting.frames_since_seen,
                max = %self.max_frames_without_face,
                "authorization_grace"
            );
            return None;
        }

        let names = self.last_authorized.take().map(|s| s.names).unwrap_or_default();
        debug!(names = ?names, "authorization_memory_expired");
        Some(IntruderAlert { reason: IntruderReason::FaceHidden, names, location: None })
    }

    pub fn clear(&mut self) {
        self.last_authorized = None;
    }
}
