use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

/// Parse repeated `key=value` arguments. Values that parse as JSON keep their
/// type (`seats=3` is a number); anything else is a string.
pub fn parse_properties(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut properties = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Expected KEY=VALUE, got '{pair}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Property key is empty in '{pair}'");
        }
        properties.insert(key.to_string(), parse_value(raw));
    }
    Ok(properties)
}

pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parse a JSON object argument.
pub fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("Payload is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("Payload must be a JSON object"),
    }
}

pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let kept: String = value.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
