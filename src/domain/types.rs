//! Shared types for the monitor: ids, geometry, detector inputs and tracks

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// COCO class id the detector uses for people
pub const PERSON_CLASS_ID: u32 = 0;

/// COCO class ids treated as weapons (baseball bat, knife, scissors)
pub const WEAPON_CLASS_IDS: [u32; 3] = [34, 43, 76];

/// COCO class ids treated as carried bags (backpack, handbag, suitcase)
pub const BAG_CLASS_IDS: [u32; 3] = [24, 26, 28];

/// Newtype wrapper for camera IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for track IDs, unique within one camera's tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned box as corner coordinates `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        if self.is_valid() {
            self.width() * self.height()
        } else {
            0.0
        }
    }

    /// Finite coordinates with positive width and height
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x1 && p.x <= self.x2 && p.y >= self.y1 && p.y <= self.y2
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        if w <= 0.0 || h <= 0.0 {
            return 0.0;
        }
        w * h
    }

    /// Intersection over union, 0.0 for disjoint or degenerate boxes
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }
}

/// One decoded detector output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub class_id: u32,
    #[serde(default)]
    pub class_name: String,
}

impl Detection {
    pub fn person(bbox: BoundingBox, confidence: f64) -> Self {
        Self { bbox, confidence, class_id: PERSON_CLASS_ID, class_name: "person".to_string() }
    }

    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }

    pub fn is_weapon(&self) -> bool {
        WEAPON_CLASS_IDS.contains(&self.class_id)
    }

    pub fn is_bag(&self) -> bool {
        BAG_CLASS_IDS.contains(&self.class_id)
    }
}

/// Face recognizer verdict for one face in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceVerdict {
    pub name: String,
    pub bbox: BoundingBox,
    pub is_authorized: bool,
}

/// Captured frame handle; pixels are only read by per-object trackers
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub captured_at: Instant,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(seq: u64, captured_at: Instant) -> Self {
        Self { seq, captured_at, width: 1920, height: 1080, data: Bytes::new() }
    }
}

/// Identity state of a track as resolved by face verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    #[default]
    Pending,
    Authorized,
    Intruder,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Authorized => "authorized",
            AuthorizationStatus::Intruder => "intruder",
        }
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one camera worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Stopped => "stopped",
            CameraStatus::Starting => "starting",
            CameraStatus::Running => "running",
            CameraStatus::Stopping => "stopping",
            CameraStatus::Failed => "failed",
        }
    }

    /// Allowed edges: stopped -> starting -> running -> stopping -> stopped,
    /// running/starting -> failed, failed -> starting (restart)
    pub fn can_transition_to(&self, next: CameraStatus) -> bool {
        use CameraStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Failed, Starting)
                | (Failed, Stopped)
        )
    }

    /// Numeric value for the status gauge
    pub fn as_gauge(&self) -> u64 {
        match self {
            CameraStatus::Stopped => 0,
            CameraStatus::Starting => 1,
            CameraStatus::Running => 2,
            CameraStatus::Stopping => 3,
            CameraStatus::Failed => 4,
        }
    }
}

impl std::fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub at: Instant,
    pub center: Point,
    pub bbox: BoundingBox,
}

/// A person followed across frames
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub bbox: BoundingBox,
    pub center: Point,
    pub created_at: Instant,
    pub last_update_at: Instant,
    pub frame_count: u32,
    pub confidence: f64,
    pub identity: String,
    pub authorization_status: AuthorizationStatus,
    /// Time-ordered, trimmed to the tracker's history window
    pub position_history: VecDeque<PositionSample>,
}

impl Track {
    pub fn new(id: TrackId, bbox: BoundingBox, confidence: f64, now: Instant) -> Self {
        let center = bbox.center();
        let mut position_history = VecDeque::new();
        position_history.push_back(PositionSample { at: now, center, bbox });
        Self {
            id,
            bbox,
            center,
            created_at: now,
            last_update_at: now,
            frame_count: 1,
            confidence,
            identity: "unknown".to_string(),
            authorization_status: AuthorizationStatus::Pending,
            position_history,
        }
    }

    /// Move the track to a new box and append a history sample
    pub fn advance(&mut self, bbox: BoundingBox, now: Instant, window: Duration) {
        self.bbox = bbox;
        self.center = bbox.center();
        self.last_update_at = now;
        self.frame_count += 1;

        // Out-of-order timestamps would break the history ordering
        if self.position_history.back().is_some_and(|s| s.at > now) {
            return;
        }
        self.position_history.push_back(PositionSample { at: now, center: self.center, bbox });
        while self
            .position_history
            .front()
            .is_some_and(|s| now.duration_since(s.at) > window)
        {
            self.position_history.pop_front();
        }
    }

    pub fn is_confirmed(&self, min_track_length: u32) -> bool {
        self.frame_count >= min_track_length
    }
}

/// Get current epoch time in milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
