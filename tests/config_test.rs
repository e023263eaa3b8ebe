//! Integration tests for configuration loading

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use vision_crossing::infra::{BackendMode, Config, StreamMode};

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[service]
photos_dir = "/var/lib/vision/photos"
poll_interval_secs = 2
status_type = "finish_status"
event_id = "evt-42"
font_path = "/opt/fonts/DejaVuSans.ttf"

[backend]
mode = "http"

[http]
events_url = "http://events:8082/"
users_url = "http://users:8086"
status_url = "http://status:8090"
timeout_ms = 3000

[files]
settings_file = "/etc/vision/settings.json"
status_file = "/var/lib/vision/status.json"

[stream]
mode = "mqtt"
mqtt_host = "tracker"
mqtt_port = 1884
mqtt_topic = "cam/finish/detections"
open_timeout_ms = 2500
confidence_floor = 0.5

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.photos_dir(), Path::new("/var/lib/vision/photos"));
    assert_eq!(config.poll_interval_secs(), 2);
    assert_eq!(config.status_type(), "finish_status");
    assert_eq!(config.event_id(), Some("evt-42"));
    assert_eq!(config.font_path(), Some(Path::new("/opt/fonts/DejaVuSans.ttf")));
    assert_eq!(config.backend_mode(), BackendMode::Http);
    assert_eq!(config.users_url(), "http://users:8086");
    assert_eq!(config.status_url(), "http://status:8090");
    assert_eq!(config.http_timeout_ms(), 3000);
    assert_eq!(config.settings_file(), Path::new("/etc/vision/settings.json"));
    assert_eq!(config.stream_mode(), StreamMode::Mqtt);
    assert_eq!(config.mqtt_host(), "tracker");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic(), "cam/finish/detections");
    assert_eq!(config.open_timeout_ms(), 2500);
    assert_eq!(config.confidence_floor(), 0.5);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.photos_dir(), Path::new("files"));
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.backend_mode(), BackendMode::Http);
    assert_eq!(config.stream_mode(), StreamMode::Replay);
}

#[test]
fn test_invalid_toml_is_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[stream]\nmode = \"carrier-pigeon\"\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
    let config = Config::load_from_path(&temp_file.path().display().to_string());
    assert_eq!(config.stream_mode(), StreamMode::Replay);
}

#[test]
fn test_dev_config_parses() {
    let config = Config::from_file(Path::new(env!("CARGO_MANIFEST_DIR")).join("config/dev.toml")).unwrap();
    assert_eq!(config.backend_mode(), BackendMode::File);
    assert_eq!(config.stream_mode(), StreamMode::Replay);
    assert_eq!(config.event_id(), Some("local"));
}
