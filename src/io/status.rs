//! Operator-visible status log
//!
//! Backends:
//! - `HttpStatusSink`: `POST {base}/statuses` with a JSON status record
//! - `JsonFileStatusLog`: JSON array of `"HH:MM:SS message"` lines, newest first

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Lines kept in the file status log (the new line plus 22 older ones)
pub const STATUS_LOG_CAPACITY: usize = 23;

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn create_status(&self, event_id: &str, status_type: &str, message: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct StatusRecord<'a> {
    event_id: &'a str,
    #[serde(rename = "type")]
    status_type: &'a str,
    message: &'a str,
    time: String,
}

/// Status service client
pub struct HttpStatusSink {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpStatusSink {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build status service client")?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), token: token.to_string() })
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn create_status(&self, event_id: &str, status_type: &str, message: &str) -> anyhow::Result<()> {
        let record = StatusRecord {
            event_id,
            status_type,
            message,
            time: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        };
        let response = self
            .client
            .post(format!("{}/statuses", self.base_url))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_string(&record)?)
            .send()
            .await
            .context("create_status")?;

        let status = response.status();
        debug!(status_type = %status_type, status = %status.as_u16(), "create_status");
        match status.as_u16() {
            200..=299 => Ok(()),
            401 => bail!("Login expired: create_status"),
            code => bail!("Error {code} creating status"),
        }
    }
}

/// Rolling status log in a local JSON file
pub struct JsonFileStatusLog {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStatusLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(file = %path.display(), "file_status_log_initialized");
        Self { path, write_lock: tokio::sync::Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lines, newest first; a missing file reads as empty
    pub async fn messages(&self) -> anyhow::Result<Vec<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse status file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read status file {}", self.path.display())),
        }
    }

    async fn prepend(&self, line: String) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let old = self.messages().await?;

        let mut lines = Vec::with_capacity(STATUS_LOG_CAPACITY);
        lines.push(line);
        lines.extend(old.into_iter().take(STATUS_LOG_CAPACITY - 1));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, serde_json::to_string(&lines)?)
            .await
            .with_context(|| format!("Failed to write status file {}", self.path.display()))
    }
}

#[async_trait]
impl StatusSink for JsonFileStatusLog {
    async fn create_status(&self, _event_id: &str, status_type: &str, message: &str) -> anyhow::Result<()> {
        let line = format!("{} {}", Local::now().format("%H:%M:%S"), message);
        debug!(status_type = %status_type, line = %line, "create_status");
        self.prepend(line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_log_prepends_with_time() {
        let dir = tempdir().unwrap();
        let log = JsonFileStatusLog::new(dir.path().join("status.json"));

        log.create_status("e", "video_status", "first").await.unwrap();
        log.create_status("e", "video_status", "second").await.unwrap();

        let messages = log.messages().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].ends_with(" second"));
        assert!(messages[1].ends_with(" first"));
        // "HH:MM:SS " prefix
        assert_eq!(messages[0].as_bytes()[2], b':');
        assert_eq!(messages[0].as_bytes()[8], b' ');
    }

    #[tokio::test]
    async fn test_file_log_keeps_newest_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        let old: Vec<String> = (0..30).map(|i| format!("00:00:00 old {i}")).collect();
        std::fs::write(&path, serde_json::to_string(&old).unwrap()).unwrap();
        let log = JsonFileStatusLog::new(&path);

        log.create_status("e", "video_status", "new").await.unwrap();

        let messages = log.messages().await.unwrap();
        assert_eq!(messages.len(), STATUS_LOG_CAPACITY);
        assert!(messages[0].ends_with(" new"));
        assert_eq!(messages[1], "00:00:00 old 0");
        assert_eq!(messages[22], "00:00:00 old 21");
    }

    #[tokio::test]
    async fn test_file_log_creates_missing_file() {
        let dir = tempdir().unwrap();
        let log = JsonFileStatusLog::new(dir.path().join("nested").join("status.json"));

        log.create_status("e", "video_status", "hello").await.unwrap();
        assert_eq!(log.messages().await.unwrap().len(), 1);
    }
}
