//! Run orchestration
//!
//! Idle loop for one event. Every poll interval the orchestrator reads the
//! control flags and acts on the first that is set, in this order:
//! - `VIDEO_ANALYTICS_STOP`: cleared (nothing is running)
//! - `VIDEO_ANALYTICS_START`: cleared, then one analysis run is driven to its end
//! - `DRAW_TRIGGER_LINE`: cleared, then the calibration image is drawn
//! - `VIDEO_ANALYTICS_RUNNING`: a stale flag left by a dead run is reset
//!
//! Run failures are reported to the status log and the loop carries on.

use crate::domain::error::VisionError;
use crate::domain::types::{RaceEvent, RunOutcome};
use crate::io::config_store::{keys, ConfigStore};
use crate::io::events::{select_event, EventsClient};
use crate::io::users::{Credentials, UserClient};
use crate::services::analysis::AnalysisRunner;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What a single poll did
#[derive(Debug, PartialEq)]
pub enum PollAction {
    Idle,
    StopCleared,
    RunFinished(RunOutcome),
    RunFailed(String),
    TriggerLineDrawn,
    RunningReset,
}

/// Sleep for `interval`, returning true if shutdown was requested meanwhile
pub async fn wait_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Log in, retrying every `interval` until it succeeds or shutdown is requested
pub async fn login_with_retry(
    users: &UserClient,
    credentials: &Credentials,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<String> {
    loop {
        match users.login(credentials).await {
            Ok(token) => {
                info!(username = %credentials.username, "login_succeeded");
                return Some(token);
            }
            Err(e) => warn!(error = %e, retry_secs = %interval.as_secs(), "login_failed"),
        }
        if wait_or_shutdown(interval, shutdown).await {
            return None;
        }
    }
}

/// Wait until an event can be selected
pub async fn wait_for_event(
    events: &EventsClient,
    token: &str,
    configured_id: Option<&str>,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<RaceEvent> {
    loop {
        match events.get_all_events(token).await {
            Ok(all) => match select_event(&all, configured_id) {
                Some(event) => {
                    info!(event_id = %event.id, name = %event.name, date = %event.date, "event_selected");
                    return Some(event);
                }
                None => warn!(events = %all.len(), "no_event_selected"),
            },
            Err(e) => warn!(error = %e, "get_events_failed"),
        }
        if wait_or_shutdown(interval, shutdown).await {
            return None;
        }
    }
}

/// Status category for this event, falling back to the local default
pub async fn resolve_status_type(store: &dyn ConfigStore, event_id: &str, fallback: &str) -> String {
    match store.get(event_id, keys::VIDEO_ANALYTICS_STATUS_TYPE).await {
        Ok(Some(value)) if !value.trim().is_empty() => value,
        Ok(_) => fallback.to_string(),
        Err(e) => {
            warn!(error = %e, "status_type_lookup_failed");
            fallback.to_string()
        }
    }
}

pub struct Orchestrator {
    runner: AnalysisRunner,
    event: RaceEvent,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(runner: AnalysisRunner, event: RaceEvent, poll_interval: Duration) -> Self {
        Self { runner, event, poll_interval }
    }

    fn store(&self) -> &dyn ConfigStore {
        self.runner.config_store()
    }

    fn event_id(&self) -> &str {
        self.runner.event_id()
    }

    async fn set_flag(&self, key: &str, value: bool) -> anyhow::Result<()> {
        self.store().set_bool(self.event_id(), key, value).await
    }

    async fn flag(&self, key: &str) -> anyhow::Result<bool> {
        self.store().get_bool(self.event_id(), key).await
    }

    /// Announce readiness and mark the service available
    pub async fn announce_ready(&self) -> anyhow::Result<()> {
        self.runner
            .report(&format!("Vision AI is ready! - {}, {}", self.event.name, self.event.date))
            .await;
        self.set_flag(keys::VIDEO_ANALYTICS_AVAILABLE, true).await
    }

    /// Check the control flags once and act on the first one set
    pub async fn poll_once(&self) -> anyhow::Result<PollAction> {
        if self.flag(keys::VIDEO_ANALYTICS_STOP).await? {
            self.set_flag(keys::VIDEO_ANALYTICS_STOP, false).await?;
            info!(event_id = %self.event_id(), "idle_stop_cleared");
            return Ok(PollAction::StopCleared);
        }

        if self.flag(keys::VIDEO_ANALYTICS_START).await? {
            self.set_flag(keys::VIDEO_ANALYTICS_START, false).await?;
            return Ok(match self.runner.run().await {
                Ok(outcome) => PollAction::RunFinished(outcome),
                Err(e) => {
                    self.handle_run_error(&e).await;
                    PollAction::RunFailed(e.to_string())
                }
            });
        }

        if self.flag(keys::DRAW_TRIGGER_LINE).await? {
            self.set_flag(keys::DRAW_TRIGGER_LINE, false).await?;
            return Ok(match self.runner.draw_trigger_line_on_demand().await {
                Ok(path) => {
                    let shown = path.map(|p| p.display().to_string()).unwrap_or_else(|| "no frame".to_string());
                    self.runner.report(&format!("Trigger line image updated: {shown}")).await;
                    PollAction::TriggerLineDrawn
                }
                Err(e) => {
                    self.handle_run_error(&e).await;
                    PollAction::RunFailed(e.to_string())
                }
            });
        }

        if self.flag(keys::VIDEO_ANALYTICS_RUNNING).await? {
            self.set_flag(keys::VIDEO_ANALYTICS_RUNNING, false).await?;
            warn!(event_id = %self.event_id(), "stale_running_flag_reset");
            return Ok(PollAction::RunningReset);
        }

        Ok(PollAction::Idle)
    }

    async fn handle_run_error(&self, e: &VisionError) {
        error!(event_id = %self.event_id(), error = %e, stream_unavailable = %e.is_stream_unavailable(), "run_error");
        self.runner.report(&format!("Error in Vision AI: {e}")).await;
        for key in [keys::VIDEO_ANALYTICS_RUNNING, keys::VIDEO_ANALYTICS_START] {
            if let Err(err) = self.set_flag(key, false).await {
                warn!(key = %key, error = %err, "config_flag_update_failed");
            }
        }
    }

    /// Poll until shutdown, then mark the service unavailable
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.announce_ready().await {
            warn!(error = %e, "announce_ready_failed");
        }
        info!(event_id = %self.event_id(), poll_secs = %self.poll_interval.as_secs(), "orchestrator_started");

        loop {
            match self.poll_once().await {
                Ok(PollAction::Idle) => {}
                Ok(action) => info!(action = ?action, "poll_action"),
                Err(e) => warn!(error = %e, "poll_failed"),
            }
            if wait_or_shutdown(self.poll_interval, &mut shutdown).await {
                break;
            }
        }

        if let Err(e) = self.set_flag(keys::VIDEO_ANALYTICS_AVAILABLE, false).await {
            warn!(error = %e, "availability_reset_failed");
        }
        info!(event_id = %self.event_id(), "orchestrator_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_or_shutdown(Duration::from_secs(30), &mut rx).await });
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_times_out_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!wait_or_shutdown(Duration::from_millis(10), &mut rx).await);
    }

    #[tokio::test]
    async fn test_wait_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(wait_or_shutdown(Duration::from_secs(30), &mut rx).await);
    }

    #[tokio::test]
    async fn test_login_retry_stops_on_shutdown() {
        let users = UserClient::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let credentials = Credentials { username: "a".to_string(), password: ".".to_string() };
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert_eq!(login_with_retry(&users, &credentials, Duration::from_secs(5), &mut rx).await, None);
    }
}
