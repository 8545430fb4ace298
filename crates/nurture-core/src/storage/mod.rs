//! Storage layer with typed wrappers around nurture-storage.
//!
//! Flow, event, user and trigger-state records wrap the byte-level APIs from
//! nurture-storage. Enrollments live in tables owned here so that their
//! indexes and compare-and-set checks can work on typed records.

pub mod enrollment;
pub mod event;
pub mod flow;
pub mod trigger_state;
pub mod user;

use anyhow::Result;
use redb::Database;
use redb::backends::InMemoryBackend;
use std::path::Path;
use std::sync::Arc;

pub use nurture_storage::{ConfigStorage, SystemConfig};

pub use enrollment::{CreateOutcome, EnrollmentStore, EntryPolicy};
pub use event::{AppendedEvent, AppendedEvents, EventStore};
pub use flow::{FlowStore, SaveOutcome};
pub use trigger_state::{TriggerState, TriggerStateStore};
pub use user::{InMemoryUserDirectory, UserDirectory, UserProfileStore};

/// Central storage manager that initializes all storage subsystems.
pub struct Storage {
    db: Arc<Database>,
    pub config: ConfigStorage,
    pub flows: FlowStore,
    pub enrollments: EnrollmentStore,
    pub events: EventStore,
    pub users: UserProfileStore,
    pub trigger_state: TriggerStateStore,
}

impl Storage {
    /// Open (or create) the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);
        Self::from_db(db)
    }

    /// A database that lives only as long as this process.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::from_db(Arc::new(db))
    }

    pub fn from_db(db: Arc<Database>) -> Result<Self> {
        let config = ConfigStorage::new(db.clone())?;
        let capacity = config
            .get_config()?
            .unwrap_or_default()
            .event_log_capacity;

        Ok(Self {
            flows: FlowStore::new(db.clone())?,
            enrollments: EnrollmentStore::new(db.clone())?,
            events: EventStore::new(db.clone(), capacity)?,
            users: UserProfileStore::new(db.clone())?,
            trigger_state: TriggerStateStore::new(db.clone())?,
            config,
            db,
        })
    }

    /// Current system configuration, defaults when unset.
    pub fn system_config(&self) -> Result<SystemConfig> {
        Ok(self.config.get_config()?.unwrap_or_default())
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
