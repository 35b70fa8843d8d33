//! Alert record handed to notification and persistence sinks

use crate::domain::activity::SuspiciousActivity;
use crate::domain::types::CameraId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A suspicious activity that passed cooldown
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    /// Time-ordered unique id (UUID v7)
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub camera_id: CameraId,
    #[serde(flatten)]
    pub activity: SuspiciousActivity,
    /// Set by the snapshot store before sinks run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
}

impl AlertRecord {
    pub fn new(camera_id: CameraId, activity: SuspiciousActivity) -> Self {
        Self { id: Uuid::now_v7(), created_at: Utc::now(), camera_id, activity, snapshot_path: None }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
impl AlertRecord {
    /// Low-threat running alert for sink tests
    pub(crate) fn sample(camera: &str) -> Self {
        use crate::domain::activity::{ActivityEvidence, ThreatLevel};
        use crate::domain::types::{Point, TrackId};

        Self::new(
            CameraId::from(camera),
            SuspiciousActivity {
                evidence: ActivityEvidence::Running { speed_px_s: 210.0, threshold_px_s: 150.0 },
                threat_level: ThreatLevel::Low,
                track_id: Some(TrackId(4)),
                description: "Person running at 210 px/s".to_string(),
                timestamp: std::time::Instant::now(),
                location: Point::new(1.0, 2.0),
                zone_name: "lobby".to_string(),
                confidence: 0.7,
            },
        )
    }
}
