//! Domain models - core value types shared by every camera worker
//!
//! - `types` - ids, geometry, detector/face inputs and the `Track` record
//! - `zone` - detection zones and point-in-polygon containment
//! - `activity` - suspicious activity events and their evidence
//! - `annotation` - per-frame overlay of tracks, zones and activities
//! - `alert` - alert records handed to sinks

pub mod activity;
pub mod alert;
pub mod annotation;
pub mod types;
pub mod zone;

pub use activity::{ActivityEvidence, ActivityType, SuspiciousActivity, ThreatLevel};
pub use alert::AlertRecord;
pub use annotation::FrameAnnotation;
pub use types::{BoundingBox, CameraId, Detection, FaceVerdict, Frame, Point, Track, TrackId};
pub use zone::{DetectionZone, ZoneError, ZoneType};
