//! Event-scoped key/value configuration store
//!
//! Backends:
//! - `HttpConfigStore`: remote config service, bearer-token authenticated
//! - `JsonFileConfigStore`: a single JSON object settings file (event id ignored)
//!
//! Values are strings on the wire. Booleans accept `True`, `true` or `1`.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Remote run-configuration keys
pub mod keys {
    pub const CAMERA_LOCATION: &str = "CAMERA_LOCATION";
    pub const VIDEO_URL: &str = "VIDEO_URL";
    pub const TRIGGER_LINE_XYXYN: &str = "TRIGGER_LINE_XYXYN";
    pub const DETECTION_BOX_MINIMUM_SIZE: &str = "DETECTION_BOX_MINIMUM_SIZE";
    pub const DETECTION_BOX_MAXIMUM_SIZE: &str = "DETECTION_BOX_MAXIMUM_SIZE";
    pub const SHOW_VIDEO: &str = "SHOW_VIDEO";
    pub const VIDEO_ANALYTICS_IMAGE_SIZE: &str = "VIDEO_ANALYTICS_IMAGE_SIZE";
    pub const VIDEO_ANALYTICS_START: &str = "VIDEO_ANALYTICS_START";
    pub const VIDEO_ANALYTICS_STOP: &str = "VIDEO_ANALYTICS_STOP";
    pub const VIDEO_ANALYTICS_RUNNING: &str = "VIDEO_ANALYTICS_RUNNING";
    pub const VIDEO_ANALYTICS_AVAILABLE: &str = "VIDEO_ANALYTICS_AVAILABLE";
    pub const DRAW_TRIGGER_LINE: &str = "DRAW_TRIGGER_LINE";
    pub const TRIGGER_LINE_CONFIG_FILE: &str = "TRIGGER_LINE_CONFIG_FILE";
    pub const VIDEO_ANALYTICS_STATUS_TYPE: &str = "VIDEO_ANALYTICS_STATUS_TYPE";
}

pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "True" | "true" | "1")
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Value for `key`, or None if the store has no such key
    async fn get(&self, event_id: &str, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, event_id: &str, key: &str, value: &str) -> anyhow::Result<()>;

    /// Missing keys read as false
    async fn get_bool(&self, event_id: &str, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(event_id, key).await?.map(|v| parse_bool(&v)).unwrap_or(false))
    }

    async fn set_bool(&self, event_id: &str, key: &str, value: bool) -> anyhow::Result<()> {
        self.set(event_id, key, format_bool(value)).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigValue {
    value: String,
}

/// Config service client
///
/// `GET {base}/config?eventId=..&key=..` returns `{"value": ".."}`; 404 means
/// the key is absent. `PUT` on the same URL stores a value.
pub struct HttpConfigStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpConfigStore {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build config service client")?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), token: token.to_string() })
    }

    fn url(&self) -> String {
        format!("{}/config", self.base_url)
    }
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    async fn get(&self, event_id: &str, key: &str) -> anyhow::Result<Option<String>> {
        let response = self
            .client
            .get(self.url())
            .query(&[("eventId", event_id), ("key", key)])
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("get_config {key}"))?;

        let status = response.status();
        debug!(key = %key, status = %status.as_u16(), "get_config");
        match status.as_u16() {
            200 => {
                let body = response.text().await.with_context(|| format!("get_config {key}"))?;
                let parsed: ConfigValue = serde_json::from_str(&body)
                    .with_context(|| format!("get_config {key}: invalid body"))?;
                Ok(Some(parsed.value))
            }
            404 => Ok(None),
            401 => bail!("Login expired: get_config {key}"),
            code => bail!("Error {code} getting config {key}"),
        }
    }

    async fn set(&self, event_id: &str, key: &str, value: &str) -> anyhow::Result<()> {
        let body = serde_json::to_string(&ConfigValue { value: value.to_string() })?;
        let response = self
            .client
            .put(self.url())
            .query(&[("eventId", event_id), ("key", key)])
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("update_config {key}"))?;

        let status = response.status();
        debug!(key = %key, value = %value, status = %status.as_u16(), "update_config");
        match status.as_u16() {
            200..=299 => Ok(()),
            401 => bail!("Login expired: update_config {key}"),
            code => bail!("Error {code} updating config {key}"),
        }
    }
}

/// Settings stored as one JSON object on disk
pub struct JsonFileConfigStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(file = %path.display(), "file_config_store_initialized");
        Self { path, write_lock: tokio::sync::Mutex::new(()) }
    }

    async fn read_settings(&self) -> anyhow::Result<Map<String, Value>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read settings file {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", self.path.display()))
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(format_bool(*b).to_string()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ConfigStore for JsonFileConfigStore {
    async fn get(&self, _event_id: &str, key: &str) -> anyhow::Result<Option<String>> {
        let settings = self.read_settings().await?;
        Ok(settings.get(key).and_then(value_to_string))
    }

    async fn set(&self, _event_id: &str, key: &str, value: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.read_settings().await?;
        settings.insert(key.to_string(), Value::String(value.to_string()));

        let content = serde_json::to_string_pretty(&settings)?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write settings file {}", self.path.display()))?;
        debug!(key = %key, value = %value, "update_config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("True"));
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("False"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool(""));
    }

    #[tokio::test]
    async fn test_file_store_value_rendering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"CAMERA_LOCATION": "finish", "SHOW_VIDEO": false, "DETECTION_BOX_MINIMUM_SIZE": "0.08",
                "VIDEO_ANALYTICS_IMAGE_SIZE": 1280, "VIDEO_ANALYTICS_STOP": "True"}"#,
        )
        .unwrap();
        let store = JsonFileConfigStore::new(&path);

        assert_eq!(store.get("e", keys::CAMERA_LOCATION).await.unwrap().as_deref(), Some("finish"));
        assert!(!store.get_bool("e", keys::SHOW_VIDEO).await.unwrap());
        assert!(store.get_bool("e", keys::VIDEO_ANALYTICS_STOP).await.unwrap());
        assert_eq!(store.get("e", keys::DETECTION_BOX_MINIMUM_SIZE).await.unwrap().as_deref(), Some("0.08"));
        assert_eq!(store.get("e", keys::VIDEO_ANALYTICS_IMAGE_SIZE).await.unwrap().as_deref(), Some("1280"));
        // Missing flags read as false, missing values as None
        assert!(!store.get_bool("e", keys::DRAW_TRIGGER_LINE).await.unwrap());
        assert_eq!(store.get("e", keys::VIDEO_URL).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_set_preserves_other_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"CAMERA_LOCATION": "start", "VIDEO_ANALYTICS_START": "True"}"#).unwrap();
        let store = JsonFileConfigStore::new(&path);

        store.set_bool("e", keys::VIDEO_ANALYTICS_START, false).await.unwrap();

        assert!(!store.get_bool("e", keys::VIDEO_ANALYTICS_START).await.unwrap());
        assert_eq!(store.get("e", keys::CAMERA_LOCATION).await.unwrap().as_deref(), Some("start"));
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["VIDEO_ANALYTICS_START"], "False");
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let store = JsonFileConfigStore::new(dir.path().join("missing.json"));
        let err = store.get("e", keys::VIDEO_URL).await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read settings file"));
    }
}
