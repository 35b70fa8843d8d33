//! Suspicious activity events emitted by the analyzer
//!
//! Each activity kind carries its own evidence payload, so the kind is
//! derived from the evidence rather than stored separately.

use crate::domain::types::{AuthorizationStatus, Point, TrackId};
use crate::domain::zone::ZoneType;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Loitering,
    ZoneIntrusion,
    UnauthorizedPerson,
    Running,
    WeaponDetected,
    AbandonedObject,
    CrowdFormation,
    Intruder,
}

impl ActivityType {
    pub const ALL: [ActivityType; 8] = [
        ActivityType::Loitering,
        ActivityType::ZoneIntrusion,
        ActivityType::UnauthorizedPerson,
        ActivityType::Running,
        ActivityType::WeaponDetected,
        ActivityType::AbandonedObject,
        ActivityType::CrowdFormation,
        ActivityType::Intruder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Loitering => "loitering",
            ActivityType::ZoneIntrusion => "zone_intrusion",
            ActivityType::UnauthorizedPerson => "unauthorized_person",
            ActivityType::Running => "running",
            ActivityType::WeaponDetected => "weapon_detected",
            ActivityType::AbandonedObject => "abandoned_object",
            ActivityType::CrowdFormation => "crowd_formation",
            ActivityType::Intruder => "intruder",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown activity type '{0}'")]
pub struct UnknownActivityType(pub String);

impl std::str::FromStr for ActivityType {
    type Err = UnknownActivityType;

    /// Accepts `zone_intrusion`, `ZONE_INTRUSION` and `zoneIntrusion`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String =
            s.trim().chars().filter(|c| *c != '_' && *c != '-').collect::<String>().to_lowercase();
        ActivityType::ALL
            .into_iter()
            .find(|t| t.as_str().replace('_', "") == key)
            .ok_or_else(|| UnknownActivityType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

/// Why an intruder alert was raised by authorization memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntruderReason {
    UnknownFace,
    FaceHidden,
}

impl IntruderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntruderReason::UnknownFace => "unknown_face",
            IntruderReason::FaceHidden => "face_hidden",
        }
    }
}

/// Per-kind diagnostic payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "activity_type", content = "evidence", rename_all = "snake_case")]
pub enum ActivityEvidence {
    Loitering { duration_secs: f64, radius_px: f64 },
    ZoneIntrusion { zone_type: ZoneType, authorization: AuthorizationStatus },
    UnauthorizedPerson { identity: String },
    Running { speed_px_s: f64, threshold_px_s: f64 },
    WeaponDetected { weapon_type: String, weapon_confidence: f64, distance_px: f64 },
    AbandonedObject { object_id: String, object_type: String, stationary_secs: f64 },
    CrowdFormation { person_count: usize, threshold: usize },
    Intruder { reason: IntruderReason, names: Vec<String> },
}

impl ActivityEvidence {
    pub fn activity_type(&self) -> ActivityType {
        match self {
            ActivityEvidence::Loitering { .. } => ActivityType::Loitering,
            ActivityEvidence::ZoneIntrusion { .. } => ActivityType::ZoneIntrusion,
            ActivityEvidence::UnauthorizedPerson { .. } => ActivityType::UnauthorizedPerson,
            ActivityEvidence::Running { .. } => ActivityType::Running,
            ActivityEvidence::WeaponDetected { .. } => ActivityType::WeaponDetected,
            ActivityEvidence::AbandonedObject { .. } => ActivityType::AbandonedObject,
            ActivityEvidence::CrowdFormation { .. } => ActivityType::CrowdFormation,
            ActivityEvidence::Intruder { .. } => ActivityType::Intruder,
        }
    }
}

/// Zone label used when an activity has no containing zone
pub const UNKNOWN_AREA: &str = "unknown_area";

/// Immutable event produced by one rule on one tick
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousActivity {
    #[serde(flatten)]
    pub evidence: ActivityEvidence,
    pub threat_level: ThreatLevel,
    /// `None` for activities not tied to a person (abandoned objects, crowds)
    pub track_id: Option<TrackId>,
    pub description: String,
    #[serde(skip)]
    pub timestamp: Instant,
    pub location: Point,
    pub zone_name: String,
    pub confidence: f64,
}

impl SuspiciousActivity {
    pub fn activity_type(&self) -> ActivityType {
        self.evidence.activity_type()
    }
}
