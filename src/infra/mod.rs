//! Infrastructure - configuration, metrics, and camera stats
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free process-wide counters and periodic reporting
//! - `stats` - Per-camera stats registry read by the status surface

pub mod config;
pub mod metrics;
pub mod stats;

// Re-export commonly used types
pub use config::{
    AlertSettings, AnalyzerSettings, CameraConfig, Config, SupervisorSettings, TrackerSettings,
};
pub use metrics::{AlertStats, Metrics};
pub use stats::{CameraStats, CameraStatsSnapshot, StatsRegistry};
