//! Nurture core: lifecycle-marketing flows, their validation and the engine
//! that walks users through them.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod graph;
pub mod models;
pub mod services;
pub mod storage;
pub mod validation;

pub use error::{NurtureError, Result};
pub use models::*;

use engine::AutomationEngine;
use std::path::Path;
use std::sync::Arc;
use storage::Storage;
use tracing::info;
use validation::{AllCapabilities, CapabilityProvider};

/// Application state shared by the CLI and the background runner.
pub struct AppCore {
    pub storage: Arc<Storage>,
    pub engine: Arc<AutomationEngine>,
    /// Integrations available to flows, consulted on activation.
    pub capabilities: Arc<dyn CapabilityProvider>,
}

impl AppCore {
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();
        let storage = Arc::new(Storage::new(db_path)?);
        info!(path = %db_path.display(), "Opened nurture database");
        Self::from_storage(storage)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_storage(Arc::new(Storage::in_memory()?))
    }

    pub fn from_storage(storage: Arc<Storage>) -> anyhow::Result<Self> {
        let engine = Arc::new(AutomationEngine::from_storage(storage.clone())?);
        Ok(Self {
            storage,
            engine,
            capabilities: Arc::new(AllCapabilities),
        })
    }

    pub fn with_capabilities(mut self, capabilities: Arc<dyn CapabilityProvider>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_engine(mut self, engine: AutomationEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }
}
