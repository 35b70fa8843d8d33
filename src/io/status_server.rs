//! Status HTTP endpoint
//!
//! - `GET /metrics` - Prometheus text format (process metrics plus per-camera stats)
//! - `GET /status` - JSON stats snapshot of every camera and the alert counters
//! - `GET /health` - liveness probe
//!
//! Uses hyper http1 with one task per connection.

use crate::domain::types::CameraStatus;
use crate::infra::metrics::{
    AlertStats, Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS,
};
use crate::infra::stats::{CameraStatsSnapshot, StatsRegistry};
use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Shared state the endpoint reads from
pub struct StatusContext {
    pub site_id: String,
    pub metrics: Arc<Metrics>,
    pub stats: Arc<StatsRegistry>,
}

#[derive(Serialize)]
struct StatusDocument<'a> {
    site: &'a str,
    cameras: Vec<CameraStatsSnapshot>,
    alerts: AlertStats,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_header(output: &mut String, name: &str, help: &str, typ: &str) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {typ}");
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    write_header(output, name, help, typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    write_header(output, name, help, "gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    write_header(output, name, help, "histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// One sample per camera under a single HELP/TYPE header
fn write_camera_series(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    cameras: &[CameraStatsSnapshot],
    value: impl Fn(&CameraStatsSnapshot) -> String,
) {
    write_header(output, name, help, typ.as_str());
    for cam in cameras {
        let _ = writeln!(
            output,
            "{name}{{site=\"{site}\",camera=\"{}\"}} {}",
            cam.camera_id,
            value(cam)
        );
    }
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(ctx: &StatusContext) -> String {
    let summary = ctx
        .metrics
        .report(ctx.stats.count_in(CameraStatus::Running), ctx.stats.total_active_tracks());
    let cameras = ctx.stats.snapshot_all();
    let site = ctx.site_id.as_str();
    let mut output = String::with_capacity(8192);

    write_tick_metrics(&mut output, site, &summary);
    write_alert_metrics(&mut output, site, &summary);
    write_camera_metrics(&mut output, site, &cameras);

    output
}

fn write_tick_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sentinel_ticks_total",
        "Analyzed ticks across all cameras",
        MetricType::Counter,
        site,
        summary.ticks_total,
    );
    write_gauge_f64(
        output,
        "sentinel_ticks_per_sec",
        "Analyzed ticks per second since last scrape",
        site,
        summary.ticks_per_sec,
    );
    write_histogram(
        output,
        "sentinel_tick_latency_us",
        "Tick analysis latency in microseconds",
        site,
        &summary.tick_latency_buckets,
        summary.avg_tick_latency_us,
    );
    write_metric(
        output,
        "sentinel_tick_latency_p99_us",
        "99th percentile tick latency",
        MetricType::Gauge,
        site,
        summary.tick_latency_p99_us,
    );
    write_metric(
        output,
        "sentinel_activities_total",
        "Suspicious activities detected",
        MetricType::Counter,
        site,
        summary.activities_total,
    );
    write_metric(
        output,
        "sentinel_running_cameras",
        "Cameras in running state",
        MetricType::Gauge,
        site,
        summary.running_cameras as u64,
    );
    write_metric(
        output,
        "sentinel_active_tracks",
        "Active tracks across all cameras",
        MetricType::Gauge,
        site,
        summary.active_tracks,
    );
}

fn write_alert_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let alerts = &summary.alerts;
    write_metric(
        output,
        "sentinel_alerts_total",
        "Alerts that passed cooldown",
        MetricType::Counter,
        site,
        alerts.total_alerts,
    );
    write_metric(
        output,
        "sentinel_alerts_suppressed_total",
        "Alerts suppressed by cooldown",
        MetricType::Counter,
        site,
        alerts.suppressed,
    );
    write_metric(
        output,
        "sentinel_alerts_dropped_total",
        "Alerts dropped on a full queue or at shutdown",
        MetricType::Counter,
        site,
        alerts.dropped,
    );
    write_metric(
        output,
        "sentinel_alert_dispatch_successes_total",
        "Successful sink deliveries",
        MetricType::Counter,
        site,
        alerts.dispatch_successes,
    );
    write_metric(
        output,
        "sentinel_alert_dispatch_failures_total",
        "Failed sink deliveries",
        MetricType::Counter,
        site,
        alerts.dispatch_failures,
    );
    write_metric(
        output,
        "sentinel_alert_queue_depth",
        "Alerts waiting for dispatch",
        MetricType::Gauge,
        site,
        alerts.queue_depth,
    );
    write_metric(
        output,
        "sentinel_alert_queue_delay_max_us",
        "Maximum alert queue delay since last scrape",
        MetricType::Gauge,
        site,
        summary.alert_queue_delay_max_us,
    );
}

fn write_camera_metrics(output: &mut String, site: &str, cameras: &[CameraStatsSnapshot]) {
    write_camera_series(
        output,
        "sentinel_camera_status",
        "Camera state (0=stopped 1=starting 2=running 3=stopping 4=failed)",
        MetricType::Gauge,
        site,
        cameras,
        |c| c.status.as_gauge().to_string(),
    );
    write_camera_series(
        output,
        "sentinel_camera_fps",
        "Captured frames per second",
        MetricType::Gauge,
        site,
        cameras,
        |c| format!("{:.3}", c.fps),
    );
    write_camera_series(
        output,
        "sentinel_camera_frames_processed_total",
        "Frames captured",
        MetricType::Counter,
        site,
        cameras,
        |c| c.frames_processed.to_string(),
    );
    write_camera_series(
        output,
        "sentinel_camera_frames_analyzed_total",
        "Frames run through tracking and analysis",
        MetricType::Counter,
        site,
        cameras,
        |c| c.frames_analyzed.to_string(),
    );
    write_camera_series(
        output,
        "sentinel_camera_active_tracks",
        "Active tracks",
        MetricType::Gauge,
        site,
        cameras,
        |c| c.active_tracks.to_string(),
    );
    write_camera_series(
        output,
        "sentinel_camera_capture_failures_total",
        "Capture failures",
        MetricType::Counter,
        site,
        cameras,
        |c| c.capture_failures.to_string(),
    );
}

fn format_status_json(ctx: &StatusContext) -> serde_json::Result<String> {
    serde_json::to_string(&StatusDocument {
        site: &ctx.site_id,
        cameras: ctx.stats.snapshot_all(),
        alerts: ctx.metrics.alert_stats(),
    })
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn route(method: &Method, path: &str, ctx: &StatusContext) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(ctx),
        ),
        (&Method::GET, "/status") => match format_status_json(ctx) {
            Ok(body) => respond(StatusCode::OK, "application/json", body),
            Err(e) => {
                error!(error = %e, "status_serialize_failed");
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "status unavailable")
            }
        },
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok"),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: Arc<StatusContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), &ctx))
}

/// Bind `0.0.0.0:port` and serve until shutdown
pub async fn start_status_server(
    port: u16,
    ctx: Arc<StatusContext>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("bind status server on {addr}"))?;
    serve(listener, ctx, shutdown).await;
    Ok(())
}

/// Accept loop on an already bound listener
pub async fn serve(listener: TcpListener, ctx: Arc<StatusContext>, mut shutdown: watch::Receiver<bool>) {
    let local = listener.local_addr().map(|a| a.to_string()).unwrap_or_default();
    info!(addr = %local, site = %ctx.site_id, "status_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, ctx.clone()));
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "status_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "status_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("status_server_shutdown");
                    return;
                }
            }
        }
    }
}
