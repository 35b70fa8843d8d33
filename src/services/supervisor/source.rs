//! Frame sources: where a camera worker gets each tick's input
//!
//! Detection and face recognition run upstream; a source yields the frame
//! handle together with the detector and recognizer output for it.

use crate::domain::types::{Detection, FaceVerdict, Frame};
use crate::infra::config::CameraConfig;
use async_trait::async_trait;
use thiserror::Error;

/// Input for one worker tick
#[derive(Debug, Clone)]
pub struct TickInput {
    pub frame: Frame,
    pub detections: Vec<Detection>,
    pub faces: Vec<FaceVerdict>,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Worth retrying after a delay
    #[error("transient capture failure: {0}")]
    Transient(String),
    #[error("capture source unavailable: {0}")]
    Fatal(String),
    /// A finite source ran out of frames
    #[error("end of stream")]
    EndOfStream,
}

#[async_trait]
pub trait FrameSource: Send {
    async fn next_tick(&mut self) -> Result<TickInput, CaptureError>;

    /// Re-establish the source after a transient failure
    async fn reconnect(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}

#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, CaptureError>;
}
