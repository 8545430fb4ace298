//! CLI configuration file support
//!
//! Loads configuration from ~/.config/nurture/config.toml

use anyhow::{Context, Result};
use nurture_core::validation::{AllCapabilities, Capability, CapabilityProvider, StaticCapabilities};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default settings
    #[serde(default)]
    pub default: DefaultConfig,
    /// Integrations this installation has set up
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default configuration values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Default database path
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Capability names such as `email_delivery`. Everything is available when unset.
    pub available: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset, e.g. `info` or `nurture_core=debug`
    pub level: Option<String>,
}

impl CliConfig {
    /// Load configuration from default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("nurture").join("config.toml"))
    }

    /// Capability provider consulted when flows are activated.
    pub fn capability_provider(&self) -> Result<Arc<dyn CapabilityProvider>> {
        let Some(names) = &self.capabilities.available else {
            return Ok(Arc::new(AllCapabilities));
        };
        let capabilities = names
            .iter()
            .map(|name| name.parse::<Capability>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()
            .context("Invalid [capabilities] entry in config.toml")?;
        Ok(Arc::new(StaticCapabilities::new(capabilities)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = CliConfig::load_from_path(Some(temp_dir.path().join("absent.toml")));
        assert!(config.default.db_path.is_none());
        assert!(config.capabilities.available.is_none());
    }

    #[test]
    fn parses_sections() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[default]
db_path = "/tmp/nurture.db"

[capabilities]
available = ["email_delivery", "webhook egress"]

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = CliConfig::load_from_path(Some(path));
        assert_eq!(config.default.db_path.as_deref(), Some("/tmp/nurture.db"));
        assert_eq!(config.logging.level.as_deref(), Some("debug"));

        let provider = config.capability_provider().unwrap();
        assert!(provider.is_capability_available("action:send_email"));
        assert!(provider.is_capability_available("action:send_webhook"));
        assert!(!provider.is_capability_available("action:api_call"));
    }

    #[test]
    fn rejects_unknown_capability() {
        let config = CliConfig {
            capabilities: CapabilitiesConfig {
                available: Some(vec!["carrier_pigeon".to_string()]),
            },
            ..CliConfig::default()
        };
        assert!(config.capability_provider().is_err());
    }
}
