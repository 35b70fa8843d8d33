//! JSONL replay feed - detection and face verdict records played back as ticks
//!
//! One record per line:
//! `{"ts_ms": 1000, "width": 1280, "height": 720, "detections": [...], "faces": [...]}`
//!
//! Frame timestamps follow the recorded `ts_ms` offsets, so analysis timing
//! is the same whether or not playback is paced against the wall clock.

use crate::domain::types::{Detection, FaceVerdict, Frame};
use crate::infra::config::CameraConfig;
use crate::services::supervisor::{CaptureError, FrameSource, SourceFactory, TickInput};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct TickRecord {
    ts_ms: u64,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    faces: Vec<FaceVerdict>,
}

/// Plays a recorded detection feed for one camera
pub struct ReplayFeed {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    /// Lines consumed so far, used to resume after a reopen
    consumed: u64,
    pace: bool,
    seq: u64,
    /// (wall-clock base, first recorded ts_ms)
    origin: Option<(Instant, u64)>,
    frame_size: (u32, u32),
}

impl ReplayFeed {
    pub async fn open(path: impl AsRef<Path>, pace: bool) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();
        let lines = open_lines(&path).await?;
        info!(path = %path.display(), pace = %pace, "replay_feed_opened");
        Ok(Self {
            path,
            lines,
            consumed: 0,
            pace,
            seq: 0,
            origin: None,
            frame_size: (1920, 1080),
        })
    }

    fn frame_at(&mut self, record: &TickRecord) -> Frame {
        let (base, first_ts) = *self.origin.get_or_insert((Instant::now(), record.ts_ms));
        let captured_at = base + Duration::from_millis(record.ts_ms.saturating_sub(first_ts));

        if let (Some(w), Some(h)) = (record.width, record.height) {
            self.frame_size = (w, h);
        }
        self.seq += 1;
        let mut frame = Frame::new(self.seq, captured_at);
        (frame.width, frame.height) = self.frame_size;
        frame
    }
}

async fn open_lines(path: &Path) -> Result<Lines<BufReader<File>>, CaptureError> {
    let file = File::open(path)
        .await
        .map_err(|e| CaptureError::Fatal(format!("{}: {e}", path.display())))?;
    Ok(BufReader::new(file).lines())
}

#[async_trait]
impl FrameSource for ReplayFeed {
    async fn next_tick(&mut self) -> Result<TickInput, CaptureError> {
        let line = loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| CaptureError::Transient(format!("read failed: {e}")))?;
            self.consumed += 1;
            match line {
                Some(l) if l.trim().is_empty() => continue,
                Some(l) => break l,
                None => return Err(CaptureError::EndOfStream),
            }
        };

        let record: TickRecord = serde_json::from_str(&line).map_err(|e| {
            CaptureError::Transient(format!("malformed record at line {}: {e}", self.consumed))
        })?;

        let frame = self.frame_at(&record);
        if self.pace {
            tokio::time::sleep_until(frame.captured_at.into()).await;
        }

        Ok(TickInput { frame, detections: record.detections, faces: record.faces })
    }

    async fn reconnect(&mut self) -> Result<(), CaptureError> {
        let mut lines = open_lines(&self.path).await?;
        for _ in 0..self.consumed {
            match lines.next_line().await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => return Err(CaptureError::Transient(format!("reopen failed: {e}"))),
            }
        }
        debug!(path = %self.path.display(), skipped = %self.consumed, "replay_feed_reopened");
        self.lines = lines;
        Ok(())
    }
}

/// Opens a `ReplayFeed` for each camera source path
#[derive(Debug, Clone)]
pub struct ReplaySourceFactory {
    pace: bool,
}

impl ReplaySourceFactory {
    pub fn new() -> Self {
        Self { pace: true }
    }

    /// Deliver records as fast as the worker consumes them
    pub fn unpaced() -> Self {
        Self { pace: false }
    }
}

impl Default for ReplaySourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceFactory for ReplaySourceFactory {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
        let source = camera.source.strip_prefix("file://").unwrap_or(&camera.source);
        if source.contains("://") {
            return Err(CaptureError::Fatal(format!("unsupported source '{}'", camera.source)));
        }
        let feed = ReplayFeed::open(source, self.pace).await?;
        Ok(Box::new(feed))
    }
}
