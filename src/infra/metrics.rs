//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Reporting swaps the periodic counters to zero; monotonic counters are
//! only ever loaded.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, ≤256000, >256000
const BUCKET_BOUNDS: [u64; 10] = [500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];
const NUM_BUCKETS: usize = 11;

/// Exported for the Prometheus endpoint
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile).ceil() as u64;
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return if i < BUCKET_BOUNDS.len() { BUCKET_BOUNDS[i] } else { BUCKET_BOUNDS[9] * 2 };
        }
    }
    BUCKET_BOUNDS[9] * 2
}

/// Process-wide counters for analysis ticks and alert dispatch
pub struct Metrics {
    /// Analyzed ticks across all cameras (monotonic)
    ticks_total: AtomicU64,
    /// Ticks since last report (reset on report)
    ticks_since_report: AtomicU64,
    tick_latency_sum_us: AtomicU64,
    tick_latency_max_us: AtomicU64,
    tick_latency_buckets: [AtomicU64; NUM_BUCKETS],
    activities_total: AtomicU64,
    /// Alerts that passed cooldown
    alerts_total: AtomicU64,
    alerts_suppressed: AtomicU64,
    /// Alerts lost to a full queue or abandoned at shutdown
    alerts_dropped: AtomicU64,
    dispatch_successes: AtomicU64,
    dispatch_failures: AtomicU64,
    alert_queue_depth: AtomicU64,
    alert_queue_delay_max_us: AtomicU64,
    last_alert_epoch_ms: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_since_report: AtomicU64::new(0),
            tick_latency_sum_us: AtomicU64::new(0),
            tick_latency_max_us: AtomicU64::new(0),
            tick_latency_buckets: Default::default(),
            activities_total: AtomicU64::new(0),
            alerts_total: AtomicU64::new(0),
            alerts_suppressed: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            dispatch_successes: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            alert_queue_depth: AtomicU64::new(0),
            alert_queue_delay_max_us: AtomicU64::new(0),
            last_alert_epoch_ms: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record one analyzed tick and its processing latency
    #[inline]
    pub fn record_tick(&self, latency_us: u64) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.ticks_since_report.fetch_add(1, Ordering::Relaxed);
        self.tick_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.tick_latency_max_us, latency_us);
        self.tick_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_activities(&self, count: usize) {
        self.activities_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_alert_enqueued(&self, epoch_ms: u64) {
        self.alerts_total.fetch_add(1, Ordering::Relaxed);
        self.alert_queue_depth.fetch_add(1, Ordering::Relaxed);
        self.last_alert_epoch_ms.store(epoch_ms, Ordering::Relaxed);
    }

    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Called when the dispatch worker takes an alert off the queue
    pub fn record_alert_dequeued(&self, queue_delay_us: u64) {
        // Saturating: a concurrent reset must never wrap the gauge
        let _ = self.alert_queue_depth.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
            Some(d.saturating_sub(1))
        });
        update_atomic_max(&self.alert_queue_delay_max_us, queue_delay_us);
    }

    pub fn record_dispatch(&self, success: bool) {
        if success {
            self.dispatch_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    pub fn alert_queue_depth(&self) -> u64 {
        self.alert_queue_depth.load(Ordering::Relaxed)
    }

    /// Read-only view of alert counters
    pub fn alert_stats(&self) -> AlertStats {
        AlertStats {
            total_alerts: self.alerts_total.load(Ordering::Relaxed),
            suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            dropped: self.alerts_dropped.load(Ordering::Relaxed),
            dispatch_successes: self.dispatch_successes.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            queue_depth: self.alert_queue_depth.load(Ordering::Relaxed),
            last_alert_epoch_ms: match self.last_alert_epoch_ms.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(ms),
            },
        }
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self, running_cameras: usize, active_tracks: u64) -> MetricsSummary {
        let ticks = self.ticks_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.tick_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.tick_latency_max_us.swap(0, Ordering::Relaxed);
        let queue_delay_max = self.alert_queue_delay_max_us.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.tick_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let ticks_per_sec =
            if elapsed.as_secs_f64() > 0.0 { ticks as f64 / elapsed.as_secs_f64() } else { 0.0 };

        MetricsSummary {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_per_sec,
            avg_tick_latency_us: if ticks > 0 { latency_sum / ticks } else { 0 },
            max_tick_latency_us: max_latency,
            tick_latency_p50_us: percentile_from_buckets(&buckets, 0.50),
            tick_latency_p99_us: percentile_from_buckets(&buckets, 0.99),
            tick_latency_buckets: buckets,
            activities_total: self.activities_total.load(Ordering::Relaxed),
            alerts: self.alert_stats(),
            alert_queue_delay_max_us: queue_delay_max,
            running_cameras,
            active_tracks,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Alert orchestration counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AlertStats {
    pub total_alerts: u64,
    pub suppressed: u64,
    pub dropped: u64,
    pub dispatch_successes: u64,
    pub dispatch_failures: u64,
    pub queue_depth: u64,
    pub last_alert_epoch_ms: Option<u64>,
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub ticks_per_sec: f64,
    pub avg_tick_latency_us: u64,
    pub max_tick_latency_us: u64,
    pub tick_latency_p50_us: u64,
    pub tick_latency_p99_us: u64,
    pub tick_latency_buckets: [u64; NUM_BUCKETS],
    pub activities_total: u64,
    pub alerts: AlertStats,
    pub alert_queue_delay_max_us: u64,
    pub running_cameras: usize,
    pub active_tracks: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks_total = %self.ticks_total,
            ticks_per_sec = format!("{:.1}", self.ticks_per_sec),
            avg_latency_us = %self.avg_tick_latency_us,
            max_latency_us = %self.max_tick_latency_us,
            p99_us = %self.tick_latency_p99_us,
            cameras = %self.running_cameras,
            active_tracks = %self.active_tracks,
            activities = %self.activities_total,
            alerts = %self.alerts.total_alerts,
            suppressed = %self.alerts.suppressed,
            dispatch_failures = %self.alerts.dispatch_failures,
            queue_depth = %self.alerts.queue_depth,
            "metrics"
        );
    }
}
