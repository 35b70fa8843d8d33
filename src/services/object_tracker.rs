//! Per-object trackers that follow one person between detector hits
//!
//! The track store drives one `ObjectTracker` per live track. Pixel-based
//! trackers plug in through `TrackerFactory`; the built-in `MotionTracker`
//! needs no pixels and follows a constant-velocity model corrected by the
//! detections the store associates to it.

use crate::domain::types::{BoundingBox, Frame};
use std::time::Instant;

/// Frames a motion tracker may predict without a confirming detection
pub const DEFAULT_MAX_COAST_FRAMES: u32 = 15; // ~5 s at 3 analyzed fps

/// Weight of the newest velocity estimate when smoothing
const VELOCITY_SMOOTHING: f64 = 0.5;

pub trait ObjectTracker: Send {
    /// Start following `bbox` in `frame`; false if the tracker cannot lock on
    fn init(&mut self, frame: &Frame, bbox: BoundingBox) -> bool;

    /// Locate the object in a new frame, `None` when it is lost
    fn update(&mut self, frame: &Frame) -> Option<BoundingBox>;

    /// A detection was associated to this tracker on the current tick
    fn observe(&mut self, _bbox: BoundingBox) {}
}

pub trait TrackerFactory: Send + Sync {
    fn create(&self) -> Box<dyn ObjectTracker>;
}

/// Constant-velocity tracker anchored on associated detections
#[derive(Debug, Clone)]
pub struct MotionTracker {
    bbox: BoundingBox,
    at: Option<Instant>,
    /// Last detection-confirmed box and when it was confirmed
    anchor: Option<(BoundingBox, Instant)>,
    velocity: (f64, f64),
    coasting: u32,
    max_coast_frames: u32,
}

impl MotionTracker {
    pub fn new(max_coast_frames: u32) -> Self {
        Self {
            bbox: BoundingBox::default(),
            at: None,
            anchor: None,
            velocity: (0.0, 0.0),
            coasting: 0,
            max_coast_frames,
        }
    }
}

impl ObjectTracker for MotionTracker {
    fn init(&mut self, frame: &Frame, bbox: BoundingBox) -> bool {
        if !bbox.is_valid() {
            return false;
        }
        self.bbox = bbox;
        self.at = Some(frame.captured_at);
        self.anchor = Some((bbox, frame.captured_at));
        self.velocity = (0.0, 0.0);
        self.coasting = 0;
        true
    }

    fn update(&mut self, frame: &Frame) -> Option<BoundingBox> {
        let at = self.at?;
        if self.coasting >= self.max_coast_frames {
            return None;
        }

        let dt = frame.captured_at.saturating_duration_since(at).as_secs_f64();
        let predicted = self.bbox.translate(self.velocity.0 * dt, self.velocity.1 * dt);

        // Fully outside the frame means the person walked out of view
        let view = BoundingBox::new(0.0, 0.0, frame.width as f64, frame.height as f64);
        if frame.width > 0 && frame.height > 0 && predicted.intersection_area(&view) <= 0.0 {
            return None;
        }

        self.bbox = predicted;
        self.at = Some(frame.captured_at);
        self.coasting += 1;
        Some(predicted)
    }

    fn observe(&mut self, bbox: BoundingBox) {
        let Some(now) = self.at else {
            return;
        };
        if let Some((prev, prev_at)) = self.anchor {
            let dt = now.saturating_duration_since(prev_at).as_secs_f64();
            if dt > 0.0 {
                let (c0, c1) = (prev.center(), bbox.center());
                let v = ((c1.x - c0.x) / dt, (c1.y - c0.y) / dt);
                self.velocity = (
                    VELOCITY_SMOOTHING * v.0 + (1.0 - VELOCITY_SMOOTHING) * self.velocity.0,
                    VELOCITY_SMOOTHING * v.1 + (1.0 - VELOCITY_SMOOTHING) * self.velocity.1,
                );
            }
        }
        self.bbox = bbox;
        self.anchor = Some((bbox, now));
        self.coasting = 0;
    }
}

/// Builds `MotionTracker`s
#[derive(Debug, Clone)]
pub struct MotionTrackerFactory {
    pub max_coast_frames: u32,
}

impl Default for MotionTrackerFactory {
    fn default() -> Self {
        Self { max_coast_frames: DEFAULT_MAX_COAST_FRAMES }
    }
}

impl TrackerFactory for MotionTrackerFactory {
    fn create(&self) -> Box<dyn ObjectTracker> {
        Box::new(MotionTracker::new(self.max_coast_frames))
    }
}
