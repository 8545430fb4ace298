//! Typed event log wrapper.

use crate::models::{IngestOutcome, StoredEvent};
use anyhow::Result;
use nurture_storage::{AppendOutcome, EventLogStorage};
use redb::Database;
use std::sync::Arc;

/// Where an appended event landed in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendedEvent {
    pub seq: u64,
    pub outcome: IngestOutcome,
}

/// Per-event outcomes of a batch append, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendedEvents {
    pub entries: Vec<AppendedEvent>,
    pub evicted: usize,
}

/// Bounded, deduplicated event log holding [`StoredEvent`] records.
#[derive(Debug, Clone)]
pub struct EventStore {
    inner: EventLogStorage,
    capacity: usize,
}

impl EventStore {
    pub fn new(db: Arc<Database>, capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: EventLogStorage::new(db)?,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, event: &StoredEvent) -> Result<AppendedEvent> {
        let report = self.append_batch(std::slice::from_ref(event))?;
        report
            .entries
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Append produced no outcome for {}", event.message_id))
    }

    pub fn append_batch(&self, events: &[StoredEvent]) -> Result<AppendedEvents> {
        let encoded = events
            .iter()
            .map(|event| Ok((event.message_id.as_str(), serde_json::to_vec(event)?)))
            .collect::<Result<Vec<_>>>()?;

        let report = self.inner.append_batch(
            encoded
                .iter()
                .map(|(message_id, bytes)| (*message_id, bytes.as_slice())),
            self.capacity,
        )?;

        Ok(AppendedEvents {
            entries: report
                .outcomes
                .iter()
                .map(|outcome| match *outcome {
                    AppendOutcome::Appended { seq } => AppendedEvent {
                        seq,
                        outcome: IngestOutcome::Ingested,
                    },
                    AppendOutcome::Duplicate { seq } => AppendedEvent {
                        seq,
                        outcome: IngestOutcome::Duplicate,
                    },
                })
                .collect(),
            evicted: report.evicted,
        })
    }

    /// Mark the event at `seq` as fully processed.
    pub fn complete(&self, seq: u64) -> Result<bool> {
        self.inner.complete(seq)
    }

    pub fn is_pending(&self, seq: u64) -> Result<bool> {
        self.inner.is_pending(seq)
    }

    /// Events whose processing has not completed yet, oldest first.
    pub fn pending(&self, limit: usize) -> Result<Vec<(u64, StoredEvent)>> {
        let mut events = Vec::new();
        for (seq, bytes) in self.inner.pending(limit)? {
            events.push((seq, serde_json::from_slice(&bytes)?));
        }
        Ok(events)
    }

    pub fn get_seq(&self, seq: u64) -> Result<Option<StoredEvent>> {
        match self.inner.get(seq)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, message_id: &str) -> Result<bool> {
        self.inner.contains(message_id)
    }

    pub fn get(&self, message_id: &str) -> Result<Option<StoredEvent>> {
        match self.inner.get_by_message_id(message_id)? {
            Some((_, bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Newest events first.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let mut events = Vec::new();
        for (_, bytes) in self.inner.recent(limit)? {
            events.push(serde_json::from_slice(&bytes)?);
        }
        Ok(events)
    }

    pub fn len(&self) -> Result<usize> {
        self.inner.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty()
    }
}
