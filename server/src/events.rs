//! Server event forwarding to the external analytics stream.
//!
//! Every server event is written to the Message Director's event log and
//! also handed to an [`EventSink`]. Forwarding is fire-and-forget: a sink
//! failure is logged and never reported back to the repository.

use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Event body forwarded to the analytics service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleEvent {
    #[serde(rename = "EventName")]
    pub event_name: String,
    #[serde(rename = "Body")]
    pub body: Map<String, Value>,
}

impl TitleEvent {
    /// Analytics event names use underscores where server events use dashes.
    pub fn new(event_type: &str, body: Map<String, Value>) -> Self {
        Self {
            event_name: event_type.replace('-', "_"),
            body,
        }
    }
}

pub trait EventSink: Send {
    fn write_title_event(&self, event: TitleEvent);
}

/// Posts events to PlayFab's `Server/WriteTitleEvent` endpoint.
pub struct PlayFabSink {
    client: reqwest::Client,
    url: String,
    secret_key: String,
}

impl PlayFabSink {
    pub fn new(title_id: &str, secret_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("https://{}.playfabapi.com/Server/WriteTitleEvent", title_id),
            secret_key: secret_key.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventSink for PlayFabSink {
    fn write_title_event(&self, event: TitleEvent) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    "No async runtime available, dropping title event {}",
                    event.event_name
                );
                return;
            }
        };

        let request = self
            .client
            .post(&self.url)
            .header("X-SecretKey", &self.secret_key)
            .json(&event);
        let event_name = event.event_name;

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Title event {} accepted", event_name);
                }
                Ok(response) => {
                    warn!(
                        "Title event {} rejected with status {}",
                        event_name,
                        response.status()
                    );
                }
                Err(e) => warn!("Failed to forward title event {}: {}", event_name, e),
            }
        });
    }
}

/// Drops every event. Used when no analytics title is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn write_title_event(&self, event: TitleEvent) {
        debug!("Analytics disabled, skipping title event {}", event.event_name);
    }
}

/// Keeps every event in memory; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<TitleEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TitleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn write_title_event(&self, event: TitleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
