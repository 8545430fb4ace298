use anyhow::{Context, Result};
use std::path::PathBuf;

const NURTURE_DIR: &str = ".nurture";
const DB_FILE: &str = "nurture.db";
const LOGS_DIR: &str = "logs";

/// Environment variable to override the data directory.
const NURTURE_DIR_ENV: &str = "NURTURE_DIR";

/// Resolve the data directory.
/// Priority: NURTURE_DIR env var > ~/.nurture/
pub fn resolve_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(NURTURE_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(NURTURE_DIR))
        .context("Failed to determine home directory")
}

pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = resolve_data_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

/// ~/.nurture/nurture.db
pub fn ensure_database_path() -> Result<PathBuf> {
    Ok(ensure_data_dir()?.join(DB_FILE))
}

/// ~/.nurture/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = ensure_data_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
