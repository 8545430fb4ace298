use crate::AppCore;
use crate::storage::SystemConfig;
use anyhow::{Context, Result};

/// Complete system configuration, defaults when nothing is stored.
pub fn get_config(core: &AppCore) -> Result<SystemConfig> {
    Ok(core
        .storage
        .config
        .get_config()
        .context("Failed to get config")?
        .unwrap_or_default())
}

/// Validate and persist. The running engine picks it up on restart.
pub fn update_config(core: &AppCore, config: SystemConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    core.storage
        .config
        .update_config(config)
        .context("Failed to update config")
}
