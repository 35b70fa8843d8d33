//! Alert log - appends dispatched alerts to a JSONL file
//!
//! One JSON object per line, written from the alert worker through
//! `spawn_blocking` so the runtime threads never wait on the disk.

use crate::domain::alert::AlertRecord;
use crate::services::alert_worker::AlertSink;
use anyhow::Context;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// JSONL persistence sink
pub struct AlertLog {
    file_path: Arc<PathBuf>,
}

impl AlertLog {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        info!(file_path = %file_path.display(), "alert_log_initialized");
        Self { file_path: Arc::new(file_path) }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Append a line, creating the file and its parent directories as needed
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    debug!(file = %path.display(), bytes = %line.len(), "alert_log_written");
    Ok(())
}

#[async_trait]
impl AlertSink for AlertLog {
    fn name(&self) -> &'static str {
        "alert_log"
    }

    async fn deliver(&self, alert: &AlertRecord) -> anyhow::Result<()> {
        let json = alert.to_json()?;
        let path = self.file_path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &json))
            .await?
            .with_context(|| format!("append to {}", self.file_path.display()))
    }
}
