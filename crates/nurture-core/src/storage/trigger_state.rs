//! Last-fire bookkeeping for schedule and date-property triggers.

use anyhow::Result;
use redb::Database;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerState {
    /// Cron slot most recently fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<i64>,
    /// Calendar day (`YYYY-MM-DD`) of the last date-property sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_swept_day: Option<String>,
}

/// Typed wrapper around nurture-storage::TriggerStateStorage, keyed by flow id.
#[derive(Debug, Clone)]
pub struct TriggerStateStore {
    inner: nurture_storage::TriggerStateStorage,
}

impl TriggerStateStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            inner: nurture_storage::TriggerStateStorage::new(db)?,
        })
    }

    pub fn get(&self, flow_id: &str) -> Result<TriggerState> {
        match self.inner.get_raw(flow_id)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(TriggerState::default()),
        }
    }

    /// Record `slot` as fired. False when it (or a later slot) already was,
    /// so concurrent sweeps fire each slot once.
    pub fn claim_slot(&self, flow_id: &str, slot: i64) -> Result<bool> {
        self.claim(flow_id, |state| {
            if state.last_fired_at.is_some_and(|last| last >= slot) {
                return false;
            }
            state.last_fired_at = Some(slot);
            true
        })
    }

    /// Record `day` as swept. False when it already was.
    pub fn claim_day(&self, flow_id: &str, day: &str) -> Result<bool> {
        self.claim(flow_id, |state| {
            if state.last_swept_day.as_deref() == Some(day) {
                return false;
            }
            state.last_swept_day = Some(day.to_string());
            true
        })
    }

    fn claim<F>(&self, flow_id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut TriggerState) -> bool,
    {
        self.inner.update_raw(flow_id, |current| {
            let mut state: TriggerState = match current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => TriggerState::default(),
            };
            if !apply(&mut state) {
                return Ok(None);
            }
            Ok(Some(serde_json::to_vec(&state)?))
        })
    }

    pub fn delete(&self, flow_id: &str) -> Result<bool> {
        self.inner.delete(flow_id)
    }
}
