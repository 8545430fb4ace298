//! System configuration storage.

use anyhow::Result;
use redb::{Database, ReadableDatabase, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CONFIG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("system_config");

// Default configuration constants
const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_MAX_DISPATCH_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 30_000; // 30 seconds
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 3_600_000; // 1 hour
const DEFAULT_EVENT_LOG_CAPACITY: usize = 50_000;
const DEFAULT_CLAIM_LEASE_SECONDS: u64 = 300; // 5 minutes
const DEFAULT_DUE_BATCH_SIZE: usize = 500;
const DEFAULT_MAX_STEPS_PER_PASS: u32 = 64;
const MIN_WORKER_COUNT: usize = 1;
const MIN_POLL_INTERVAL_MS: u64 = 50;
const MIN_CLAIM_LEASE_SECONDS: u64 = 10;

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Enrollments advanced concurrently within one scheduler pass
    pub worker_count: usize,
    pub poll_interval_ms: u64,
    /// Dispatch attempts before an enrollment moves to `error`
    pub max_dispatch_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Upper bound on retained events; older events are evicted FIFO
    pub event_log_capacity: usize,
    pub claim_lease_seconds: u64,
    pub due_batch_size: usize,
    pub max_steps_per_pass: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_dispatch_attempts: DEFAULT_MAX_DISPATCH_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            claim_lease_seconds: DEFAULT_CLAIM_LEASE_SECONDS,
            due_batch_size: DEFAULT_DUE_BATCH_SIZE,
            max_steps_per_pass: DEFAULT_MAX_STEPS_PER_PASS,
        }
    }
}

impl SystemConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.worker_count < MIN_WORKER_COUNT {
            return Err(anyhow::anyhow!(
                "Worker count must be at least {}",
                MIN_WORKER_COUNT
            ));
        }

        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(anyhow::anyhow!(
                "Poll interval must be at least {}ms",
                MIN_POLL_INTERVAL_MS
            ));
        }

        if self.max_dispatch_attempts == 0 {
            return Err(anyhow::anyhow!("Max dispatch attempts must be at least 1"));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(anyhow::anyhow!(
                "Retry base delay ({}ms) exceeds retry max delay ({}ms)",
                self.retry_base_delay_ms,
                self.retry_max_delay_ms
            ));
        }

        if self.event_log_capacity == 0 {
            return Err(anyhow::anyhow!("Event log capacity must be at least 1"));
        }

        if self.claim_lease_seconds < MIN_CLAIM_LEASE_SECONDS {
            return Err(anyhow::anyhow!(
                "Claim lease must be at least {} seconds",
                MIN_CLAIM_LEASE_SECONDS
            ));
        }

        if self.due_batch_size == 0 {
            return Err(anyhow::anyhow!("Due batch size must be at least 1"));
        }

        if self.max_steps_per_pass == 0 {
            return Err(anyhow::anyhow!("Max steps per pass must be at least 1"));
        }

        Ok(())
    }

    /// Backoff before the next dispatch attempt, given how many attempts failed so far.
    pub fn retry_delay_ms(&self, failed_attempts: u32) -> u64 {
        let exponent = failed_attempts.saturating_sub(1).min(32);
        self.retry_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_delay_ms)
    }
}

/// Configuration storage
#[derive(Clone)]
pub struct ConfigStorage {
    db: Arc<Database>,
}

impl ConfigStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        // Create table
        let write_txn = db.begin_write()?;
        write_txn.open_table(CONFIG_TABLE)?;
        write_txn.commit()?;

        let storage = Self { db };

        // Set default config if not exists
        if storage.get_config()?.is_none() {
            storage.update_config(SystemConfig::default())?;
        }

        Ok(storage)
    }

    /// Get system configuration
    pub fn get_config(&self) -> Result<Option<SystemConfig>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONFIG_TABLE)?;

        if let Some(data) = table.get("system")? {
            let config: SystemConfig = serde_json::from_slice(data.value())?;
            Ok(Some(config))
        } else {
            Ok(None)
        }
    }

    /// Update system configuration
    pub fn update_config(&self, config: SystemConfig) -> Result<()> {
        // Validate before saving
        config.validate()?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONFIG_TABLE)?;
            let serialized = serde_json::to_vec(&config)?;
            table.insert("system", serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get worker count
    pub fn get_worker_count(&self) -> Result<usize> {
        Ok(self.get_config()?.unwrap_or_default().worker_count)
    }

    /// Update worker count
    pub fn set_worker_count(&self, count: usize) -> Result<()> {
        let mut config = self.get_config()?.unwrap_or_default();
        config.worker_count = count.max(MIN_WORKER_COUNT);
        self.update_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup_test_storage() -> (ConfigStorage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(Database::create(db_path).unwrap());
        let storage = ConfigStorage::new(db).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_default_config() {
        let (storage, _temp_dir) = setup_test_storage();

        let config = storage.get_config().unwrap().unwrap();
        assert_eq!(config, SystemConfig::default());
        assert_eq!(config.event_log_capacity, 50_000);
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn test_update_config() {
        let (storage, _temp_dir) = setup_test_storage();

        let config = SystemConfig {
            worker_count: 8,
            event_log_capacity: 1_000,
            ..SystemConfig::default()
        };
        storage.update_config(config).unwrap();

        let loaded = storage.get_config().unwrap().unwrap();
        assert_eq!(loaded.worker_count, 8);
        assert_eq!(loaded.event_log_capacity, 1_000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (storage, _temp_dir) = setup_test_storage();

        let config = SystemConfig {
            event_log_capacity: 0,
            ..SystemConfig::default()
        };
        assert!(storage.update_config(config).is_err());

        let config = SystemConfig {
            retry_base_delay_ms: 10_000,
            retry_max_delay_ms: 1_000,
            ..SystemConfig::default()
        };
        assert!(storage.update_config(config).is_err());

        // Stored config unchanged
        assert_eq!(
            storage.get_config().unwrap().unwrap(),
            SystemConfig::default()
        );
    }

    #[test]
    fn test_set_worker_count_clamps() {
        let (storage, _temp_dir) = setup_test_storage();

        storage.set_worker_count(0).unwrap();
        assert_eq!(storage.get_worker_count().unwrap(), 1);
    }

    #[test]
    fn test_retry_delay_is_exponential_and_capped() {
        let config = SystemConfig {
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 5_000,
            ..SystemConfig::default()
        };

        assert_eq!(config.retry_delay_ms(1), 1_000);
        assert_eq!(config.retry_delay_ms(2), 2_000);
        assert_eq!(config.retry_delay_ms(3), 4_000);
        assert_eq!(config.retry_delay_ms(4), 5_000);
        assert_eq!(config.retry_delay_ms(60), 5_000);
    }
}
