//! Snapshot writer - stores the frame annotation behind each alert
//!
//! Files are named `<alert id>.json` inside the configured directory.

use crate::domain::activity::ThreatLevel;
use crate::domain::alert::AlertRecord;
use crate::domain::annotation::FrameAnnotation;
use crate::services::alert_worker::SnapshotStore;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

#[derive(Serialize)]
struct SnapshotDocument<'a> {
    alert_id: Uuid,
    camera_id: &'a str,
    activity_type: &'static str,
    /// Highest threat drawn on the frame
    max_threat: Option<ThreatLevel>,
    annotation: &'a FrameAnnotation,
}

pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn persist(
        &self,
        alert: &AlertRecord,
        annotation: &FrameAnnotation,
    ) -> anyhow::Result<String> {
        let doc = SnapshotDocument {
            alert_id: alert.id,
            camera_id: alert.camera_id.as_str(),
            activity_type: alert.activity.activity_type().as_str(),
            max_threat: annotation.max_threat(),
            annotation,
        };
        let body = serde_json::to_vec_pretty(&doc)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create snapshot dir {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}.json", alert.id));
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("write snapshot {}", path.display()))?;

        debug!(alert_id = %alert.id, path = %path.display(), "alert_snapshot_written");
        Ok(path.display().to_string())
    }
}
