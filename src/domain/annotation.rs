//! Per-tick frame overlay published for video/UI consumers and alert snapshots

use crate::domain::activity::{ActivityType, SuspiciousActivity, ThreatLevel};
use crate::domain::types::{AuthorizationStatus, BoundingBox, CameraId, Frame, Point, Track, TrackId};
use crate::domain::zone::{DetectionZone, ZoneType};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackOverlay {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
    pub identity: String,
    pub authorization: AuthorizationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneOverlay {
    pub name: String,
    pub zone_type: ZoneType,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityOverlay {
    pub activity_type: ActivityType,
    pub threat_level: ThreatLevel,
    pub track_id: Option<TrackId>,
    pub location: Point,
    pub description: String,
}

impl From<&SuspiciousActivity> for ActivityOverlay {
    fn from(a: &SuspiciousActivity) -> Self {
        Self {
            activity_type: a.activity_type(),
            threat_level: a.threat_level,
            track_id: a.track_id,
            location: a.location,
            description: a.description.clone(),
        }
    }
}

/// Everything drawn on top of one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameAnnotation {
    pub camera_id: CameraId,
    pub frame_seq: u64,
    pub width: u32,
    pub height: u32,
    pub tracks: Vec<TrackOverlay>,
    pub zones: Vec<ZoneOverlay>,
    pub activities: Vec<ActivityOverlay>,
}

impl FrameAnnotation {
    pub fn new<'a>(
        camera_id: &CameraId,
        frame: &Frame,
        tracks: impl IntoIterator<Item = &'a Track>,
        zones: &[DetectionZone],
        activities: &[SuspiciousActivity],
    ) -> Self {
        Self {
            camera_id: camera_id.clone(),
            frame_seq: frame.seq,
            width: frame.width,
            height: frame.height,
            tracks: tracks
                .into_iter()
                .map(|t| TrackOverlay {
                    track_id: t.id,
                    bbox: t.bbox,
                    identity: t.identity.clone(),
                    authorization: t.authorization_status,
                })
                .collect(),
            zones: zones
                .iter()
                .map(|z| ZoneOverlay {
                    name: z.name().to_string(),
                    zone_type: z.zone_type(),
                    points: z.points().to_vec(),
                })
                .collect(),
            activities: activities.iter().map(ActivityOverlay::from).collect(),
        }
    }

    /// Highest threat currently drawn, if any
    pub fn max_threat(&self) -> Option<ThreatLevel> {
        self.activities.iter().map(|a| a.threat_level).max()
    }
}
