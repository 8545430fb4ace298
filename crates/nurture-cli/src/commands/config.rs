use anyhow::{Context, Result, bail};
use nurture_core::AppCore;
use nurture_core::services::config as settings;
use nurture_core::storage::SystemConfig;
use serde_json::Value;
use std::sync::Arc;

use crate::cli::{ConfigCommands, OutputFormat};
use crate::commands::shared::parse_value;
use crate::output::json::print_json;

pub async fn run(core: Arc<AppCore>, command: ConfigCommands, format: OutputFormat) -> Result<()> {
    match command {
        ConfigCommands::Show => show_config(&settings::get_config(&core)?, format),
        ConfigCommands::Set { key, value } => {
            let config = apply_setting(settings::get_config(&core)?, &key, &value)?;
            settings::update_config(&core, config.clone())?;
            if !format.is_json() {
                println!("Set {key}. Running schedulers pick it up on restart.");
                return Ok(());
            }
            show_config(&config, format)
        }
    }
}

fn show_config(config: &SystemConfig, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(config);
    }
    let Value::Object(fields) = serde_json::to_value(config)? else {
        bail!("System config did not serialize to an object");
    };
    for (key, value) in fields {
        println!("{key:<24} {value}");
    }
    Ok(())
}

/// Replace one field, addressed by its serialized name.
fn apply_setting(config: SystemConfig, key: &str, raw: &str) -> Result<SystemConfig> {
    let mut value = serde_json::to_value(config)?;
    let Some(fields) = value.as_object_mut() else {
        bail!("System config did not serialize to an object");
    };
    if !fields.contains_key(key) {
        let known: Vec<&str> = fields.keys().map(String::as_str).collect();
        bail!("Unknown config key '{key}'. Known keys: {}", known.join(", "));
    }
    fields.insert(key.to_string(), parse_value(raw));
    serde_json::from_value(value).with_context(|| format!("Invalid value '{raw}' for {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_known_numeric_field() {
        let config = apply_setting(SystemConfig::default(), "worker_count", "8").unwrap();
        assert_eq!(config.worker_count, 8);
    }

    #[test]
    fn rejects_unknown_key_and_bad_value() {
        assert!(apply_setting(SystemConfig::default(), "workers", "8").is_err());
        assert!(apply_setting(SystemConfig::default(), "worker_count", "many").is_err());
    }
}
