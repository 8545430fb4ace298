//! Typed flow storage wrapper with optimistic versioning.

use crate::models::{FlowDefinition, FlowMetrics, FlowStatus};
use anyhow::Result;
use redb::Database;
use std::sync::Arc;

/// Outcome of a versioned save.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The stored definition after the save, with its new version.
    Saved(FlowDefinition),
    /// The caller's version no longer matches the stored one.
    Conflict { expected: u64, actual: u64 },
}

/// Typed flow storage wrapper around nurture-storage::FlowStorage.
#[derive(Debug, Clone)]
pub struct FlowStore {
    inner: nurture_storage::FlowStorage,
}

impl FlowStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            inner: nurture_storage::FlowStorage::new(db)?,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<FlowDefinition>> {
        match self.inner.get_raw(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All flows, ordered by id.
    pub fn list(&self) -> Result<Vec<FlowDefinition>> {
        let mut flows = Vec::new();
        for (_, bytes) in self.inner.list_raw()? {
            flows.push(serde_json::from_slice(&bytes)?);
        }
        Ok(flows)
    }

    pub fn list_by_status(&self, status: FlowStatus) -> Result<Vec<FlowDefinition>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|flow| flow.status == status)
            .collect())
    }

    /// Save a definition if its version matches the stored one.
    ///
    /// The stored version is bumped and `updated_at` set to `now`. Metrics and
    /// `created_at` of an existing record are kept; they are not editor data.
    pub fn save(&self, flow: &FlowDefinition, now: i64) -> Result<SaveOutcome> {
        let mut outcome = None;
        self.inner.update_raw(&flow.id, |current| {
            let mut next = flow.clone();
            match current {
                Some(bytes) => {
                    let stored: FlowDefinition = serde_json::from_slice(bytes)?;
                    if stored.version != flow.version {
                        outcome = Some(SaveOutcome::Conflict {
                            expected: flow.version,
                            actual: stored.version,
                        });
                        return Ok(None);
                    }
                    next.version = stored.version + 1;
                    next.created_at = stored.created_at;
                    next.metrics = stored.metrics;
                }
                None => next.version = flow.version + 1,
            }
            next.updated_at = now;
            let bytes = serde_json::to_vec(&next)?;
            outcome = Some(SaveOutcome::Saved(next));
            Ok(Some(bytes))
        })?;

        outcome.ok_or_else(|| anyhow::anyhow!("Save of flow {} produced no outcome", flow.id))
    }

    /// Apply a metrics change without touching the version.
    pub fn update_metrics<F>(&self, id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut FlowMetrics),
    {
        self.inner.update_raw(id, |current| {
            let Some(bytes) = current else {
                return Ok(None);
            };
            let mut flow: FlowDefinition = serde_json::from_slice(bytes)?;
            apply(&mut flow.metrics);
            Ok(Some(serde_json::to_vec(&flow)?))
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        self.inner.exists(id)
    }
}
