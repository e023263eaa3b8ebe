//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! This is the local service configuration only. Per-run parameters
//! (trigger line, camera location, video source) live in the remote
//! config store and are read through `io::config_store`.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where config values and status messages are exchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Remote event/user/config/status services
    Http,
    /// Local JSON settings and status files
    File,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Http => "http",
            BackendMode::File => "file",
        }
    }
}

/// Transport delivering tracker output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// JSONL file of frame results stored next to the frames
    Replay,
    /// Live frame results published by the tracker over MQTT
    Mqtt,
}

/// How crossing state is cleared between heats within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityReset {
    /// Track id 1 reappearing after several crossings starts a new heat
    Wraparound,
    /// State only starts fresh with a new run
    Explicit,
}

impl IdentityReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityReset::Wraparound => "wraparound",
            IdentityReset::Explicit => "explicit",
        }
    }
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Replay => "replay",
            StreamMode::Mqtt => "mqtt",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_photos_dir")]
    pub photos_dir: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Used when the remote store has no VIDEO_ANALYTICS_STATUS_TYPE
    #[serde(default = "default_status_type")]
    pub status_type: String,
    /// Preferred event when several are available
    #[serde(default)]
    pub event_id: Option<String>,
    /// TrueType/OpenType font for burned-in text
    #[serde(default)]
    pub font_path: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            photos_dir: default_photos_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            status_type: default_status_type(),
            event_id: None,
            font_path: None,
        }
    }
}

fn default_photos_dir() -> String {
    "files".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_status_type() -> String {
    "video_status".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_mode")]
    pub mode: BackendMode,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { mode: default_backend_mode() }
    }
}

fn default_backend_mode() -> BackendMode {
    BackendMode::Http
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_events_url")]
    pub events_url: String,
    #[serde(default = "default_users_url")]
    pub users_url: String,
    /// Config and status endpoints live on the events service unless overridden
    #[serde(default)]
    pub config_url: Option<String>,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            events_url: default_events_url(),
            users_url: default_users_url(),
            config_url: None,
            status_url: None,
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

fn default_events_url() -> String {
    "http://localhost:8082".to_string()
}

fn default_users_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_http_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
    #[serde(default = "default_status_file")]
    pub status_file: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self { settings_file: default_settings_file(), status_file: default_status_file() }
    }
}

fn default_settings_file() -> String {
    "config/global_settings.json".to_string()
}

fn default_status_file() -> String {
    "config/status.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_mode")]
    pub mode: StreamMode,
    /// Replay file name inside the VIDEO_URL directory
    #[serde(default = "default_detections_file")]
    pub detections_file: String,
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub mqtt_topic: String,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default)]
    pub person_class_id: i64,
    /// Detections below this confidence are skipped
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_identity_reset")]
    pub identity_reset: IdentityReset,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode: default_stream_mode(),
            detections_file: default_detections_file(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_topic: default_mqtt_topic(),
            open_timeout_ms: default_open_timeout_ms(),
            person_class_id: 0,
            confidence_floor: default_confidence_floor(),
            identity_reset: default_identity_reset(),
        }
    }
}

fn default_stream_mode() -> StreamMode {
    StreamMode::Replay
}

fn default_detections_file() -> String {
    "detections.jsonl".to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "vision/detections".to_string()
}

fn default_open_timeout_ms() -> u64 {
    5000
}

fn default_identity_reset() -> IdentityReset {
    IdentityReset::Wraparound
}

fn default_confidence_floor() -> f64 {
    0.6
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), prometheus_port: 0 }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    photos_dir: PathBuf,
    poll_interval_secs: u64,
    status_type: String,
    event_id: Option<String>,
    font_path: Option<PathBuf>,
    backend_mode: BackendMode,
    events_url: String,
    users_url: String,
    config_url: String,
    status_url: String,
    http_timeout_ms: u64,
    settings_file: PathBuf,
    status_file: PathBuf,
    stream_mode: StreamMode,
    detections_file: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    open_timeout_ms: u64,
    person_class_id: i64,
    confidence_floor: f64,
    identity_reset: IdentityReset,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        let http = toml_config.http;
        let config_url = http.config_url.unwrap_or_else(|| http.events_url.clone());
        let status_url = http.status_url.unwrap_or_else(|| http.events_url.clone());

        Self {
            photos_dir: PathBuf::from(toml_config.service.photos_dir),
            poll_interval_secs: toml_config.service.poll_interval_secs,
            status_type: toml_config.service.status_type,
            event_id: toml_config.service.event_id.filter(|id| !id.is_empty()),
            font_path: toml_config.service.font_path.map(PathBuf::from),
            backend_mode: toml_config.backend.mode,
            events_url: http.events_url,
            users_url: http.users_url,
            config_url,
            status_url,
            http_timeout_ms: http.timeout_ms,
            settings_file: PathBuf::from(toml_config.files.settings_file),
            status_file: PathBuf::from(toml_config.files.status_file),
            stream_mode: toml_config.stream.mode,
            detections_file: toml_config.stream.detections_file,
            mqtt_host: toml_config.stream.mqtt_host,
            mqtt_port: toml_config.stream.mqtt_port,
            mqtt_topic: toml_config.stream.mqtt_topic,
            open_timeout_ms: toml_config.stream.open_timeout_ms,
            person_class_id: toml_config.stream.person_class_id,
            confidence_floor: toml_config.stream.confidence_floor,
            identity_reset: toml_config.stream.identity_reset,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
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

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    pub fn status_type(&self) -> &str {
        &self.status_type
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn font_path(&self) -> Option<&Path> {
        self.font_path.as_deref()
    }

    pub fn backend_mode(&self) -> BackendMode {
        self.backend_mode
    }

    pub fn events_url(&self) -> &str {
        &self.events_url
    }

    pub fn users_url(&self) -> &str {
        &self.users_url
    }

    pub fn config_url(&self) -> &str {
        &self.config_url
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    pub fn http_timeout_ms(&self) -> u64 {
        self.http_timeout_ms
    }

    pub fn settings_file(&self) -> &Path {
        &self.settings_file
    }

    pub fn status_file(&self) -> &Path {
        &self.status_file
    }

    pub fn stream_mode(&self) -> StreamMode {
        self.stream_mode
    }

    pub fn detections_file(&self) -> &str {
        &self.detections_file
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

    pub fn open_timeout_ms(&self) -> u64 {
        self.open_timeout_ms
    }

    pub fn person_class_id(&self) -> i64 {
        self.person_class_id
    }

    pub fn confidence_floor(&self) -> f64 {
        self.confidence_floor
    }

    pub fn identity_reset(&self) -> IdentityReset {
        self.identity_reset
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to redirect photo output
    pub fn with_photos_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.photos_dir = dir.into();
        self
    }

    /// Builder method for tests to shorten the idle poll
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}
