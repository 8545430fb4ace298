use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A behavioral event as retained in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Idempotency key supplied by the producer
    pub message_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub timestamp: i64,
}

impl StoredEvent {
    pub fn new(
        message_id: impl Into<String>,
        user_id: impl Into<String>,
        event: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            user_id: user_id.into(),
            account_id: None,
            event: event.into(),
            properties: Map::new(),
            timestamp,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn snapshot(&self) -> EventSnapshot {
        EventSnapshot {
            name: self.event.clone(),
            properties: self.properties.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// The triggering context kept on an enrollment for condition evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub timestamp: i64,
}

impl EventSnapshot {
    pub fn new(name: impl Into<String>, properties: Map<String, Value>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            properties,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Ingested,
    Duplicate,
}

/// Counts reported by a batch ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchIngestReport {
    pub ingested: usize,
    pub duplicates: usize,
}
