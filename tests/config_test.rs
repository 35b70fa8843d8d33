//! Integration tests for configuration loading

use sentinel_monitor::domain::activity::ActivityType;
use sentinel_monitor::domain::types::CameraId;
use sentinel_monitor::domain::zone::ZoneType;
use sentinel_monitor::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[tracker]
iou_threshold = 0.4
min_track_length = 3
max_tracks = 8

[analyzer]
loitering_threshold_secs = 45
speed_threshold_px_s = 220.0
crowd_threshold = 7

[alerts]
cooldown_secs = 60
queue_capacity = 16
log_file = "/var/log/sentinel/alerts.jsonl"
snapshot_dir = "/var/lib/sentinel/snapshots"

[authorization]
max_frames_without_face = 4

[supervisor]
frame_skip_interval = 2
max_capture_failures = 9
discovery_interval_secs = 0

[mqtt]
enabled = true
host = "test-host"
port = 1884
topic = "site/alerts"

[webhook]
url = "http://hooks.local/alerts"
timeout_ms = 1500

[status]
port = 9191

[metrics]
interval_secs = 15

[[cameras]]
id = "lobby"
name = "Lobby entrance"
source = "feeds/lobby.jsonl"

[[cameras.zones]]
name = "vault"
zone_type = "restricted"
activity_types = ["zone_intrusion", "loitering"]
points = [[0, 0], [640, 0], [640, 360], [0, 360]]

[[cameras]]
id = "dock"
source = "feeds/dock.jsonl"
enabled = false
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.tracker().iou_threshold, 0.4);
    assert_eq!(config.tracker().min_track_length, 3);
    assert_eq!(config.tracker().max_tracks, 8);
    assert_eq!(config.analyzer().loitering_threshold, Duration::from_secs(45));
    assert_eq!(config.analyzer().crowd_threshold, 7);
    assert_eq!(config.alerts().cooldown, Duration::from_secs(60));
    assert_eq!(config.alerts().queue_capacity, 16);
    assert_eq!(config.alerts().snapshot_dir.as_deref(), Some("/var/lib/sentinel/snapshots"));
    assert_eq!(config.supervisor().max_frames_without_face, 4);
    assert_eq!(config.supervisor().frame_skip_interval, 2);
    assert!(config.supervisor().discovery_interval.is_zero());
    assert!(config.mqtt_enabled());
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic(), "site/alerts");
    assert_eq!(config.webhook_url(), Some("http://hooks.local/alerts"));
    assert_eq!(config.webhook_timeout_ms(), 1500);
    assert_eq!(config.status_port(), 9191);
    assert_eq!(config.metrics_interval_secs(), 15);

    assert_eq!(config.cameras().len(), 2);
    let lobby = &config.cameras()[0];
    assert_eq!(lobby.id, CameraId::from("lobby"));
    assert_eq!(lobby.name, "Lobby entrance");
    assert_eq!(lobby.zones[0].zone_type(), ZoneType::Restricted);
    assert!(lobby.zones[0].watches(ActivityType::Loitering));

    let enabled: Vec<&str> = config.enabled_cameras().map(|c| c.id.as_str()).collect();
    assert_eq!(enabled, vec!["lobby"]);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.alerts().cooldown, Duration::from_secs(300));
    assert_eq!(config.supervisor().frame_skip_interval, 3);
    assert!(config.cameras().is_empty());
}

#[test]
fn test_from_file_error_names_path() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[tracker]\niou_threshold = 3.0\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains(&temp_file.path().display().to_string()), "{msg}");
    assert!(msg.contains("iou_threshold"), "{msg}");
}

#[test]
fn test_sample_config_parses() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert!(!config.cameras().is_empty());
}
