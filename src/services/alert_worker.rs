//! Alert dispatch worker - runs snapshot persistence and sinks off the hot path
//!
//! Camera workers never wait on disk or network: the AlertManager enqueues
//! alert commands via an mpsc channel and this worker performs the side
//! effects one alert at a time.

use crate::domain::alert::AlertRecord;
use crate::domain::annotation::FrameAnnotation;
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Notification or persistence target for dispatched alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &AlertRecord) -> anyhow::Result<()>;
}

/// Persists the frame annotation attached to an alert
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns where the snapshot was written
    async fn persist(&self, alert: &AlertRecord, annotation: &FrameAnnotation)
        -> anyhow::Result<String>;
}

/// An alert waiting for dispatch
#[derive(Debug)]
pub struct AlertCmd {
    pub record: AlertRecord,
    pub snapshot: Option<FrameAnnotation>,
    /// When the command was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

pub struct AlertWorker {
    cmd_rx: mpsc::Receiver<AlertCmd>,
    sinks: Vec<Arc<dyn AlertSink>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    metrics: Arc<Metrics>,
    /// Set when shutdown gave up waiting; remaining commands are dropped
    abandon: Arc<AtomicBool>,
}

impl AlertWorker {
    pub fn new(
        cmd_rx: mpsc::Receiver<AlertCmd>,
        sinks: Vec<Arc<dyn AlertSink>>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
        metrics: Arc<Metrics>,
        abandon: Arc<AtomicBool>,
    ) -> Self {
        Self { cmd_rx, sinks, snapshots, metrics, abandon }
    }

    /// Run until the channel closes
    pub async fn run(mut self) {
        info!(sinks = %self.sinks.len(), "alert_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_us = cmd.enqueued_at.elapsed().as_micros() as u64;
            self.metrics.record_alert_dequeued(queue_delay_us);

            if self.abandon.load(Ordering::Relaxed) {
                self.metrics.record_alert_dropped();
                debug!(alert_id = %cmd.record.id, "alert_abandoned");
                continue;
            }

            self.dispatch(cmd, queue_delay_us).await;
        }

        info!("alert_worker_stopped");
    }

    async fn dispatch(&self, cmd: AlertCmd, queue_delay_us: u64) {
        let AlertCmd { mut record, snapshot, .. } = cmd;
        let start = Instant::now();

        if let (Some(store), Some(annotation)) = (&self.snapshots, &snapshot) {
            match store.persist(&record, annotation).await {
                Ok(path) => record.snapshot_path = Some(path),
                Err(e) => {
                    warn!(alert_id = %record.id, error = %e, "alert_snapshot_failed");
                }
            }
        }

        let mut failures = 0usize;
        for sink in &self.sinks {
            match sink.deliver(&record).await {
                Ok(()) => self.metrics.record_dispatch(true),
                Err(e) => {
                    failures += 1;
                    self.metrics.record_dispatch(false);
                    warn!(
                        alert_id = %record.id,
                        sink = %sink.name(),
                        error = %e,
                        "alert_sink_failed"
                    );
                }
            }
        }

        info!(
            alert_id = %record.id,
            camera = %record.camera_id,
            activity = %record.activity.activity_type(),
            threat = %record.activity.threat_level.as_str(),
            sinks = %self.sinks.len(),
            failures = %failures,
            queue_delay_us = %queue_delay_us,
            dispatch_us = %start.elapsed().as_micros(),
            "alert_dispatched"
        );
    }
}

/// Create an alert channel and worker
///
/// Returns the sender (for the AlertManager) and the worker (to be spawned)
pub fn create_alert_worker(
    sinks: Vec<Arc<dyn AlertSink>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    metrics: Arc<Metrics>,
    abandon: Arc<AtomicBool>,
    buffer_size: usize,
) -> (mpsc::Sender<AlertCmd>, AlertWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size.max(1));
    let worker = AlertWorker::new(cmd_rx, sinks, snapshots, metrics, abandon);
    (cmd_tx, worker)
}
