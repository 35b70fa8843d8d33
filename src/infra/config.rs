//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::{CameraId, Point};
use crate::domain::zone::{DetectionZone, ZoneType};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Unique site identifier used as metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "sentinel".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,
    #[serde(default = "default_min_track_length")]
    pub min_track_length: u32,
    #[serde(default = "default_track_timeout_secs")]
    pub track_timeout_secs: f64,
    #[serde(default = "default_max_tracks")]
    pub max_tracks: usize,
    #[serde(default = "default_history_window_secs")]
    pub history_window_secs: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: default_iou_threshold(),
            min_track_length: default_min_track_length(),
            track_timeout_secs: default_track_timeout_secs(),
            max_tracks: default_max_tracks(),
            history_window_secs: default_history_window_secs(),
        }
    }
}

fn default_iou_threshold() -> f64 {
    0.5
}

fn default_min_track_length() -> u32 {
    5
}

fn default_track_timeout_secs() -> f64 {
    5.0
}

fn default_max_tracks() -> usize {
    20
}

fn default_history_window_secs() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_loitering_threshold_secs")]
    pub loitering_threshold_secs: f64,
    #[serde(default = "default_loiter_radius_px")]
    pub loiter_radius_px: f64,
    #[serde(default = "default_abandoned_object_threshold_secs")]
    pub abandoned_object_threshold_secs: f64,
    #[serde(default = "default_speed_threshold_px_s")]
    pub speed_threshold_px_s: f64,
    #[serde(default = "default_crowd_threshold")]
    pub crowd_threshold: usize,
    #[serde(default = "default_min_analysis_frames")]
    pub min_analysis_frames: u32,
    #[serde(default = "default_weapon_radius_px")]
    pub weapon_radius_px: f64,
    #[serde(default = "default_object_grid_px")]
    pub object_grid_px: f64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            loitering_threshold_secs: default_loitering_threshold_secs(),
            loiter_radius_px: default_loiter_radius_px(),
            abandoned_object_threshold_secs: default_abandoned_object_threshold_secs(),
            speed_threshold_px_s: default_speed_threshold_px_s(),
            crowd_threshold: default_crowd_threshold(),
            min_analysis_frames: default_min_analysis_frames(),
            weapon_radius_px: default_weapon_radius_px(),
            object_grid_px: default_object_grid_px(),
            history_capacity: default_history_capacity(),
        }
    }
}

fn default_loitering_threshold_secs() -> f64 {
    30.0
}

fn default_loiter_radius_px() -> f64 {
    50.0
}

fn default_abandoned_object_threshold_secs() -> f64 {
    60.0
}

fn default_speed_threshold_px_s() -> f64 {
    150.0
}

fn default_crowd_threshold() -> usize {
    5
}

fn default_min_analysis_frames() -> u32 {
    10
}

fn default_weapon_radius_px() -> f64 {
    100.0
}

fn default_object_grid_px() -> f64 {
    10.0
}

fn default_history_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_queue_warn_depth")]
    pub queue_warn_depth: usize,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// JSONL alert log (omit to disable)
    #[serde(default = "default_alert_log_file")]
    pub log_file: Option<String>,
    /// Directory for per-alert snapshot annotations (omit to disable)
    #[serde(default)]
    pub snapshot_dir: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            queue_capacity: default_queue_capacity(),
            queue_warn_depth: default_queue_warn_depth(),
            drain_timeout_ms: default_drain_timeout_ms(),
            log_file: default_alert_log_file(),
            snapshot_dir: None,
        }
    }
}

fn default_cooldown_secs() -> f64 {
    300.0
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_queue_warn_depth() -> usize {
    64
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

fn default_alert_log_file() -> Option<String> {
    Some("alerts.jsonl".to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default = "default_max_frames_without_face")]
    pub max_frames_without_face: u32,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self { max_frames_without_face: default_max_frames_without_face() }
    }
}

fn default_max_frames_without_face() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_frame_skip_interval")]
    pub frame_skip_interval: u32,
    #[serde(default = "default_max_capture_failures")]
    pub max_capture_failures: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// 0 disables background discovery
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    #[serde(default = "default_activity_log_capacity")]
    pub activity_log_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            frame_skip_interval: default_frame_skip_interval(),
            max_capture_failures: default_max_capture_failures(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            discovery_interval_secs: default_discovery_interval_secs(),
            activity_log_capacity: default_activity_log_capacity(),
        }
    }
}

fn default_frame_skip_interval() -> u32 {
    3
}

fn default_max_capture_failures() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_join_timeout_ms() -> u64 {
    5000
}

fn default_discovery_interval_secs() -> u64 {
    10
}

fn default_activity_log_capacity() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "sentinel/alerts".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// HTTP status port (0 to disable)
    #[serde(default = "default_status_port")]
    pub port: u16,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { port: default_status_port() }
    }
}

fn default_status_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneTable {
    pub name: String,
    pub zone_type: ZoneType,
    #[serde(default)]
    pub activity_types: Vec<String>,
    pub points: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraTable {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Detection feed location (JSONL replay file)
    pub source: String,
    #[serde(default = "default_camera_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub zones: Vec<ZoneTable>,
}

fn default_camera_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub cameras: Vec<CameraTable>,
}

/// Track store tuning
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub iou_threshold: f64,
    pub min_track_length: u32,
    pub track_timeout: Duration,
    pub max_tracks: usize,
    pub history_window: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            min_track_length: 5,
            track_timeout: Duration::from_secs(5),
            max_tracks: 20,
            history_window: Duration::from_secs(10),
        }
    }
}

/// Activity rule thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub loitering_threshold: Duration,
    pub loiter_radius_px: f64,
    pub abandoned_object_threshold: Duration,
    pub speed_threshold_px_s: f64,
    pub crowd_threshold: usize,
    /// Tracks younger than this many frames are not analyzed
    pub min_analysis_frames: u32,
    pub weapon_radius_px: f64,
    /// Grid used to turn a bag center into a stable object id
    pub object_grid_px: f64,
    pub history_capacity: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            loitering_threshold: Duration::from_secs(30),
            loiter_radius_px: 50.0,
            abandoned_object_threshold: Duration::from_secs(60),
            speed_threshold_px_s: 150.0,
            crowd_threshold: 5,
            min_analysis_frames: 10,
            weapon_radius_px: 100.0,
            object_grid_px: 10.0,
            history_capacity: 1000,
        }
    }
}

/// Alert orchestration tuning
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub queue_capacity: usize,
    pub queue_warn_depth: usize,
    pub drain_timeout: Duration,
    pub log_file: Option<String>,
    pub snapshot_dir: Option<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            queue_capacity: 1024,
            queue_warn_depth: 64,
            drain_timeout: Duration::from_millis(2000),
            log_file: Some("alerts.jsonl".to_string()),
            snapshot_dir: None,
        }
    }
}

/// Camera worker lifecycle tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    pub frame_skip_interval: u32,
    pub max_capture_failures: u32,
    pub reconnect_delay: Duration,
    pub join_timeout: Duration,
    pub discovery_interval: Duration,
    pub activity_log_capacity: usize,
    pub max_frames_without_face: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            frame_skip_interval: 3,
            max_capture_failures: 5,
            reconnect_delay: Duration::from_millis(2000),
            join_timeout: Duration::from_millis(5000),
            discovery_interval: Duration::from_secs(10),
            activity_log_capacity: 500,
            max_frames_without_face: 10,
        }
    }
}

/// One camera the supervisor should run
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    pub id: CameraId,
    pub name: String,
    pub source: String,
    pub enabled: bool,
    /// Empty means the worker installs a full-frame monitored zone
    pub zones: Vec<DetectionZone>,
}

impl CameraConfig {
    pub fn new(id: &str, source: &str) -> Self {
        Self {
            id: CameraId::from(id),
            name: id.to_string(),
            source: source.to_string(),
            enabled: true,
            zones: Vec::new(),
        }
    }

    pub fn with_zone(mut self, zone: DetectionZone) -> Self {
        self.zones.push(zone);
        self
    }
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    tracker: TrackerSettings,
    analyzer: AnalyzerSettings,
    alerts: AlertSettings,
    supervisor: SupervisorSettings,
    cameras: Vec<CameraConfig>,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    webhook_url: Option<String>,
    webhook_timeout_ms: u64,
    status_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: "sentinel".to_string(),
            tracker: TrackerSettings::default(),
            analyzer: AnalyzerSettings::default(),
            alerts: AlertSettings::default(),
            supervisor: SupervisorSettings::default(),
            cameras: Vec::new(),
            mqtt_enabled: false,
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "sentinel/alerts".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            webhook_url: None,
            webhook_timeout_ms: 5000,
            status_port: 9090,
            metrics_interval_secs: 10,
            config_file: "default".to_string(),
        }
    }
}

/// Seconds from config as a Duration, rejecting negative or non-finite values
fn secs(field: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{field} must be a non-negative number of seconds, got {value}"))
}

fn camera_from_table(table: CameraTable) -> anyhow::Result<CameraConfig> {
    if table.id.trim().is_empty() {
        anyhow::bail!("camera id must not be empty");
    }
    let mut zones: Vec<DetectionZone> = Vec::with_capacity(table.zones.len());
    for z in table.zones {
        let points = z.points.iter().map(|[x, y]| Point::new(*x, *y)).collect();
        let zone = DetectionZone::parse(z.name, points, z.zone_type, &z.activity_types)
            .with_context(|| format!("invalid zone on camera '{}'", table.id))?;
        if zones.iter().any(|existing| existing.name() == zone.name()) {
            anyhow::bail!("camera '{}' defines zone '{}' twice", table.id, zone.name());
        }
        zones.push(zone);
    }
    Ok(CameraConfig {
        name: table.name.unwrap_or_else(|| table.id.clone()),
        id: CameraId(table.id),
        source: table.source,
        enabled: table.enabled,
        zones,
    })
}

impl Config {
    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse configuration text; `source` is recorded as the config file name
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;

        let t = toml_config.tracker;
        if !(0.0..=1.0).contains(&t.iou_threshold) {
            anyhow::bail!("tracker.iou_threshold must be within 0..=1, got {}", t.iou_threshold);
        }
        let tracker = TrackerSettings {
            iou_threshold: t.iou_threshold,
            min_track_length: t.min_track_length.max(1),
            track_timeout: secs("tracker.track_timeout_secs", t.track_timeout_secs)?,
            max_tracks: t.max_tracks,
            history_window: secs("tracker.history_window_secs", t.history_window_secs)?,
        };

        let a = toml_config.analyzer;
        let analyzer = AnalyzerSettings {
            loitering_threshold: secs("analyzer.loitering_threshold_secs", a.loitering_threshold_secs)?,
            loiter_radius_px: a.loiter_radius_px,
            abandoned_object_threshold: secs(
                "analyzer.abandoned_object_threshold_secs",
                a.abandoned_object_threshold_secs,
            )?,
            speed_threshold_px_s: a.speed_threshold_px_s,
            crowd_threshold: a.crowd_threshold,
            min_analysis_frames: a.min_analysis_frames,
            weapon_radius_px: a.weapon_radius_px,
            object_grid_px: if a.object_grid_px > 0.0 { a.object_grid_px } else { 1.0 },
            history_capacity: a.history_capacity,
        };

        let al = toml_config.alerts;
        let alerts = AlertSettings {
            cooldown: secs("alerts.cooldown_secs", al.cooldown_secs)?,
            queue_capacity: al.queue_capacity.max(1),
            queue_warn_depth: al.queue_warn_depth,
            drain_timeout: Duration::from_millis(al.drain_timeout_ms),
            log_file: al.log_file,
            snapshot_dir: al.snapshot_dir,
        };

        let s = toml_config.supervisor;
        let supervisor = SupervisorSettings {
            frame_skip_interval: s.frame_skip_interval.max(1),
            max_capture_failures: s.max_capture_failures,
            reconnect_delay: Duration::from_millis(s.reconnect_delay_ms),
            join_timeout: Duration::from_millis(s.join_timeout_ms),
            discovery_interval: Duration::from_secs(s.discovery_interval_secs),
            activity_log_capacity: s.activity_log_capacity,
            max_frames_without_face: toml_config.authorization.max_frames_without_face,
        };

        let mut cameras: Vec<CameraConfig> = Vec::with_capacity(toml_config.cameras.len());
        for table in toml_config.cameras {
            let camera = camera_from_table(table)?;
            if cameras.iter().any(|c| c.id == camera.id) {
                anyhow::bail!("camera '{}' is defined twice", camera.id);
            }
            cameras.push(camera);
        }

        Ok(Self {
            site_id: toml_config.site.id,
            tracker,
            analyzer,
            alerts,
            supervisor,
            cameras,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            webhook_url: toml_config.webhook.url,
            webhook_timeout_ms: toml_config.webhook.timeout_ms,
            status_port: toml_config.status.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: source.to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Cameras marked enabled
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.iter().filter(|c| c.enabled)
    }

    // Getters for all config fields

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn tracker(&self) -> &TrackerSettings {
        &self.tracker
    }

    pub fn analyzer(&self) -> &AnalyzerSettings {
        &self.analyzer
    }

    pub fn alerts(&self) -> &AlertSettings {
        &self.alerts
    }

    pub fn supervisor(&self) -> &SupervisorSettings {
        &self.supervisor
    }

    pub fn cameras(&self) -> &[CameraConfig] {
        &self.cameras
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url.as_deref()
    }

    pub fn webhook_timeout_ms(&self) -> u64 {
        self.webhook_timeout_ms
    }

    pub fn status_port(&self) -> u16 {
        self.status_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the camera list
    #[cfg(test)]
    pub fn with_cameras(mut self, cameras: Vec<CameraConfig>) -> Self {
        self.cameras = cameras;
        self
    }
}
