//! CLI setup module
//!
//! Opens the embedded core and installs logging.

use crate::config::CliConfig;
use crate::paths;
use anyhow::{Context, Result};
use nurture_core::AppCore;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Build the embedded core. Flag/env path > config.toml > ~/.nurture/nurture.db
pub fn prepare_core(db_path: Option<String>, config: &CliConfig) -> Result<Arc<AppCore>> {
    let db_path = match db_path.or_else(|| config.default.db_path.clone()) {
        Some(path) => path.into(),
        None => paths::ensure_database_path()?,
    };
    let core = AppCore::new(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?
        .with_capabilities(config.capability_provider()?);
    Ok(Arc::new(core))
}

/// Log to daily files under the data directory, and to stderr when `to_stderr`.
///
/// The returned guard must live until exit so buffered lines get flushed.
pub fn init_logging(config: &CliConfig, verbose: bool, to_stderr: bool) -> Result<WorkerGuard> {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&default_level))?;

    let file_appender = tracing_appender::rolling::daily(paths::logs_dir()?, "nurture.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(true);
    let stderr_layer = to_stderr.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}
