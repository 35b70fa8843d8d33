//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `feed` - JSONL replay of detector and face recognizer output
//! - `alert_log` - Alert records appended to a file (JSONL format)
//! - `snapshot` - Frame annotation written per alert
//! - `mqtt_notifier` - MQTT publisher for alert records
//! - `webhook` - HTTP POST of alert records
//! - `status_server` - Prometheus metrics, camera status and health over HTTP

pub mod alert_log;
pub mod feed;
pub mod mqtt_notifier;
pub mod snapshot;
pub mod status_server;
pub mod webhook;

// Re-export commonly used types
pub use alert_log::AlertLog;
pub use feed::{ReplayFeed, ReplaySourceFactory};
pub use mqtt_notifier::MqttNotifier;
pub use snapshot::JsonSnapshotStore;
pub use status_server::{start_status_server, StatusContext};
pub use webhook::WebhookNotifier;
