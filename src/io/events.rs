//! Race event lookup and selection

use crate::domain::types::RaceEvent;
use anyhow::{bail, Context};
use std::time::Duration;
use tracing::debug;

pub struct EventsClient {
    client: reqwest::Client,
    base_url: String,
}

impl EventsClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build events service client")?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// `GET {base}/events` with the bearer token
    pub async fn get_all_events(&self, token: &str) -> anyhow::Result<Vec<RaceEvent>> {
        let response = self
            .client
            .get(format!("{}/events", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .context("get_all_events")?;

        let status = response.status();
        debug!(status = %status.as_u16(), "get_all_events");
        match status.as_u16() {
            200 => {
                let body = response.text().await.context("get_all_events")?;
                serde_json::from_str(&body).context("get_all_events: invalid body")
            }
            401 => bail!("Login expired: get_all_events"),
            code => bail!("Error {code} getting events"),
        }
    }
}

/// Pick the event to work on
///
/// One event is used as is. With none, the configured id is used. With
/// several, the configured id selects one; an unknown configured id is used
/// as given; without one the first event wins.
pub fn select_event(events: &[RaceEvent], configured_id: Option<&str>) -> Option<RaceEvent> {
    match events {
        [] => configured_id.map(RaceEvent::with_id),
        [only] => Some(only.clone()),
        [first, ..] => match configured_id {
            Some(id) => Some(
                events.iter().find(|e| e.id == id).cloned().unwrap_or_else(|| RaceEvent::with_id(id)),
            ),
            None => Some(first.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, name: &str) -> RaceEvent {
        RaceEvent { id: id.to_string(), name: name.to_string(), date: "2026-02-01".to_string() }
    }

    #[test]
    fn test_single_event_wins() {
        let events = vec![event("a", "Sprint")];
        assert_eq!(select_event(&events, Some("zzz")), Some(event("a", "Sprint")));
    }

    #[test]
    fn test_no_events_uses_configured_id() {
        assert_eq!(select_event(&[], Some("cfg")), Some(RaceEvent::with_id("cfg")));
        assert_eq!(select_event(&[], None), None);
    }

    #[test]
    fn test_many_events_match_configured_id() {
        let events = vec![event("a", "Sprint"), event("b", "Relay")];
        assert_eq!(select_event(&events, Some("b")), Some(event("b", "Relay")));
    }

    #[test]
    fn test_many_events_unknown_configured_id() {
        let events = vec![event("a", "Sprint"), event("b", "Relay")];
        assert_eq!(select_event(&events, Some("c")), Some(RaceEvent::with_id("c")));
    }

    #[test]
    fn test_many_events_without_configured_id() {
        let events = vec![event("a", "Sprint"), event("b", "Relay")];
        assert_eq!(select_event(&events, None), Some(event("a", "Sprint")));
    }

    #[test]
    fn test_event_deserialize_ignores_extra_fields() {
        let events: Vec<RaceEvent> =
            serde_json::from_str(r#"[{"id": "x", "name": "Cup", "date": "2026-03-01", "timezone": "Europe/Oslo"}]"#)
                .unwrap();
        assert_eq!(events[0].id, "x");
        assert_eq!(events[0].name, "Cup");
    }
}
