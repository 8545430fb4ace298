pub mod json;
pub mod table;

use chrono::{DateTime, Utc};
use clap::ValueEnum;

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

/// Millisecond timestamp as `YYYY-MM-DD HH:MM:SS` UTC.
pub fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

pub fn format_optional_timestamp(ms: Option<i64>) -> String {
    ms.map(format_timestamp).unwrap_or_else(|| "-".to_string())
}

pub fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}
