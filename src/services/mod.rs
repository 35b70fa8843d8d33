//! Services - business logic and per-camera state
//!
//! This module contains the core monitoring services:
//! - `object_tracker` - Per-object trackers driven by the track store
//! - `person_tracker` - Track store associating person detections into tracks
//! - `analyzer` - Suspicious activity rules over confirmed tracks
//! - `authorization` - Grace-period memory of authorized faces
//! - `alert_manager` - Cooldown filtering and non-blocking alert enqueue
//! - `alert_worker` - Async alert dispatch to snapshot store and sinks
//! - `supervisor` - Camera lifecycle, worker tasks and discovery

pub mod alert_manager;
pub mod alert_worker;
pub mod analyzer;
pub mod authorization;
pub mod object_tracker;
pub mod person_tracker;
pub mod supervisor;

// Re-export commonly used types
pub use alert_manager::{AlertManager, Dispatch};
pub use alert_worker::{create_alert_worker, AlertCmd, AlertSink, AlertWorker, SnapshotStore};
pub use analyzer::ActivityAnalyzer;
pub use authorization::{AuthorizationMemory, IntruderAlert};
pub use object_tracker::{MotionTracker, MotionTrackerFactory, ObjectTracker, TrackerFactory};
pub use person_tracker::{PersonTracker, TrackMap};
pub use supervisor::{
    CameraDirectory, CameraSupervisor, CaptureError, ConfigFileDirectory, FrameSource,
    SourceFactory, SupervisorError, TickInput, WorkerDeps, WorkerSettings,
};
