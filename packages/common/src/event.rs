use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A playback/location record handed over by the synchronization process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Stable identity of the source event.
    pub event_id: String,
    /// Which upstream produced the record (e.g. "tautulli", "plex").
    pub source: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub media_title: Option<String>,
    /// When the playback happened upstream.
    pub occurred_at: DateTime<Utc>,
    /// The raw upstream record.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SyncEvent {
    pub fn new(event_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            source: source.into(),
            username: None,
            media_title: None,
            occurred_at: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_media_title(mut self, title: impl Into<String>) -> Self {
        self.media_title = Some(title.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Checks the fields every stage relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_id.trim().is_empty() {
            return Err("event_id must not be empty".into());
        }
        if self.source.trim().is_empty() {
            return Err("source must not be empty".into());
        }
        Ok(())
    }
}
