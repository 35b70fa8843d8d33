//! End-to-end scenario: replay feed -> camera worker -> alert log on disk

use sentinel_monitor::domain::types::{CameraId, CameraStatus};
use sentinel_monitor::infra::{Config, Metrics, StatsRegistry};
use sentinel_monitor::io::{AlertLog, JsonSnapshotStore, ReplaySourceFactory};
use sentinel_monitor::services::{
    AlertManager, CameraSupervisor, MotionTrackerFactory, WorkerDeps,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

/// A person standing inside the vault with an unrecognized face
fn write_intruder_feed(path: &Path, ticks: u64) {
    let mut out = String::new();
    for i in 0..ticks {
        out.push_str(&format!(
            concat!(
                r#"{{"ts_ms":{},"width":640,"height":480,"#,
                r#""detections":[{{"bbox":{{"x1":30,"y1":10,"x2":70,"y2":90}},"confidence":0.9,"class_id":0}}],"#,
                r#""faces":[{{"name":"unknown","bbox":{{"x1":40,"y1":15,"x2":60,"y2":35}},"is_authorized":false}}]}}"#,
                "\n"
            ),
            i * 100
        ));
    }
    std::fs::write(path, out).unwrap();
}

fn write_config(dir: &Path, feed: &Path) -> std::path::PathBuf {
    let text = format!(
        r#"
[site]
id = "scenario"

[tracker]
min_track_length = 3

[alerts]
log_file = "{log}"
snapshot_dir = "{snapshots}"

[supervisor]
frame_skip_interval = 1
discovery_interval_secs = 0

[[cameras]]
id = "cam-1"
source = "{feed}"

[[cameras.zones]]
name = "vault"
zone_type = "restricted"
activity_types = ["zone_intrusion"]
points = [[0, 0], [100, 0], [100, 100], [0, 100]]
"#,
        log = dir.join("alerts.jsonl").display(),
        snapshots = dir.join("snapshots").display(),
        feed = feed.display(),
    );
    let path = dir.join("sentinel.toml");
    std::fs::write(&path, text).unwrap();
    path
}

#[tokio::test]
async fn test_replayed_intruder_reaches_alert_log() {
    let dir = tempdir().unwrap();
    let feed = dir.path().join("cam-1.jsonl");
    write_intruder_feed(&feed, 15);
    let config = Config::from_file(write_config(dir.path(), &feed)).unwrap();

    let metrics = Arc::new(Metrics::new());
    let alerts = Arc::new(
        AlertManager::new(config.alerts().clone(), metrics.clone())
            .with_sink(Arc::new(AlertLog::new(dir.path().join("alerts.jsonl"))))
            .with_snapshot_store(Arc::new(JsonSnapshotStore::new(dir.path().join("snapshots")))),
    );
    assert!(alerts.start());

    let deps = WorkerDeps {
        trackers: Arc::new(MotionTrackerFactory::default()),
        alerts: alerts.clone(),
        metrics: metrics.clone(),
    };
    let supervisor = CameraSupervisor::from_config(
        &config,
        Arc::new(ReplaySourceFactory::unpaced()),
        deps,
        Arc::new(StatsRegistry::new()),
    )
    .unwrap();
    assert_eq!(supervisor.start_all().await, 1);

    // The feed is finite: the worker stops itself at end of stream
    let id = CameraId::from("cam-1");
    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.stats(&id).map(|s| s.status) != Some(CameraStatus::Stopped) {
        assert!(Instant::now() < deadline, "camera never stopped");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    alerts.stop().await;

    let stats = supervisor.stats(&id).unwrap();
    assert_eq!(stats.frames_processed, 15);
    assert_eq!(stats.capture_failures, 0);

    let log = std::fs::read_to_string(dir.path().join("alerts.jsonl")).unwrap();
    let records: Vec<serde_json::Value> =
        log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    let kinds: Vec<&str> = records.iter().map(|r| r["activity_type"].as_str().unwrap()).collect();

    assert_eq!(records.len(), 3, "{kinds:?}");
    assert!(kinds.contains(&"zone_intrusion"));
    assert!(kinds.contains(&"unauthorized_person"));
    assert!(kinds.contains(&"intruder"));

    let intrusion = records.iter().find(|r| r["activity_type"] == "zone_intrusion").unwrap();
    assert_eq!(intrusion["camera_id"], "cam-1");
    assert_eq!(intrusion["zone_name"], "vault");
    assert_eq!(intrusion["threat_level"], "high");

    // Every alert carries the snapshot written before the sinks ran
    for record in &records {
        let snapshot = record["snapshot_path"].as_str().unwrap();
        assert!(Path::new(snapshot).exists(), "{snapshot}");
    }

    let alert_stats = alerts.stats();
    assert_eq!(alert_stats.total_alerts, 3);
    assert_eq!(alert_stats.dispatch_successes, 3);
    assert_eq!(alert_stats.dispatch_failures, 0);
}
