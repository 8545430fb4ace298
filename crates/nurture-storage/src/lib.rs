//! Nurture Storage - Low-level storage abstraction layer
//!
//! This crate provides the persistence layer for Nurture, using redb as the
//! embedded database. It exposes byte-level APIs so it stays independent of
//! the automation models; typed wrappers live in `nurture-core`.
//!
//! # Tables
//!
//! - `flows` - Flow definitions
//! - `user_profiles` - User directory
//! - `trigger_state` - Last-fire bookkeeping for schedule and date triggers
//! - `event_log:data/seq_ids/dedup/meta` - Bounded event ring with dedup index
//! - `system_config` - System configuration
//!
//! Enrollment tables are owned by `nurture-core`, which needs typed access to
//! compare-and-set them.

pub mod config;
pub mod event_log;
pub mod flow;
pub mod range_utils;
pub mod simple_storage;
pub mod time_utils;
pub mod trigger_state;
pub mod user_profile;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use config::{ConfigStorage, SystemConfig};
pub use event_log::{AppendOutcome, AppendReport, EventLogStorage};
pub use flow::FlowStorage;
pub use simple_storage::SimpleStorage;
pub use trigger_state::TriggerStateStorage;
pub use user_profile::UserProfileStorage;

/// Central storage manager that initializes all storage subsystems
pub struct Storage {
    db: Arc<Database>,
    pub flows: FlowStorage,
    pub config: ConfigStorage,
    pub events: EventLogStorage,
    pub users: UserProfileStorage,
    pub trigger_state: TriggerStateStorage,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will create the database file if it doesn't exist and initialize
    /// all required tables.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);
        Self::from_db(db)
    }

    /// Initialize all tables on an already opened database.
    pub fn from_db(db: Arc<Database>) -> Result<Self> {
        let flows = FlowStorage::new(db.clone())?;
        let config = ConfigStorage::new(db.clone())?;
        let events = EventLogStorage::new(db.clone())?;
        let users = UserProfileStorage::new(db.clone())?;
        let trigger_state = TriggerStateStorage::new(db.clone())?;

        Ok(Self {
            db,
            flows,
            config,
            events,
            users,
            trigger_state,
        })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_storage_initializes_all_tables() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("nurture.db")).unwrap();

        assert_eq!(storage.flows.count().unwrap(), 0);
        assert_eq!(storage.users.count().unwrap(), 0);
        assert!(storage.events.is_empty().unwrap());
        assert!(storage.config.get_config().unwrap().is_some());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nurture.db");

        {
            let storage = Storage::new(&path).unwrap();
            storage.flows.put_raw("flow-1", b"data").unwrap();
        }

        let storage = Storage::new(&path).unwrap();
        assert!(storage.flows.exists("flow-1").unwrap());
    }
}
