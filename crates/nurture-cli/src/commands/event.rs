use anyhow::{Context, Result};
use comfy_table::{Cell, Table};
use nurture_core::AppCore;
use nurture_core::models::{IngestOutcome, StoredEvent};
use nurture_storage::time_utils;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

use crate::cli::{EventCommands, OutputFormat};
use crate::commands::shared::{parse_properties, truncate};
use crate::output::format_timestamp;
use crate::output::json::print_json;
use crate::output::table::print_table;

pub async fn run(core: Arc<AppCore>, command: EventCommands, format: OutputFormat) -> Result<()> {
    match command {
        EventCommands::Ingest {
            user_id,
            event,
            message_id,
            account_id,
            properties,
        } => {
            let now = time_utils::now_ms();
            let mut stored = StoredEvent::new(
                message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                user_id,
                event,
                now,
            );
            stored.account_id = account_id;
            stored.properties = parse_properties(&properties)?;
            ingest_one(&core, stored, now, format)
        }
        EventCommands::IngestFile { file } => ingest_file(&core, &file, format),
        EventCommands::Recent { limit } => recent_events(&core, limit, format),
    }
}

fn ingest_one(core: &AppCore, event: StoredEvent, now: i64, format: OutputFormat) -> Result<()> {
    let message_id = event.message_id.clone();
    let outcome = core.engine.ingest_event(event, now)?;

    if format.is_json() {
        return print_json(&json!({ "messageId": message_id, "outcome": outcome }));
    }

    match outcome {
        IngestOutcome::Ingested => println!("Ingested {message_id}"),
        IngestOutcome::Duplicate => println!("Duplicate {message_id} ignored"),
    }
    Ok(())
}

fn ingest_file(core: &AppCore, file: &Path, format: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let events = parse_events(&content)
        .with_context(|| format!("{} does not hold events", file.display()))?;
    let report = core.engine.ingest_events(events, time_utils::now_ms())?;

    if format.is_json() {
        return print_json(&report);
    }

    println!(
        "Ingested {} event(s), {} duplicate(s)",
        report.ingested, report.duplicates
    );
    Ok(())
}

/// A JSON array of events, or one event per line.
fn parse_events(content: &str) -> Result<Vec<StoredEvent>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("Line {} is not an event", index + 1))
        })
        .collect()
}

fn recent_events(core: &AppCore, limit: usize, format: OutputFormat) -> Result<()> {
    let events = core.storage.events.recent(limit)?;

    if format.is_json() {
        return print_json(&events);
    }

    if events.is_empty() {
        println!("No events stored.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Message", "User", "Event", "Properties", "Time"]);
    for event in events {
        let properties = Value::Object(event.properties).to_string();
        table.add_row(vec![
            Cell::new(truncate(&event.message_id, 24)),
            Cell::new(&event.user_id),
            Cell::new(&event.event),
            Cell::new(truncate(&properties, 40)),
            Cell::new(format_timestamp(event.timestamp)),
        ]);
    }
    print_table(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_and_json_lines() {
        let array = r#"[{"messageId":"m1","userId":"u1","event":"signup","timestamp":1}]"#;
        assert_eq!(parse_events(array).unwrap().len(), 1);

        let lines = concat!(
            r#"{"messageId":"m1","userId":"u1","event":"signup","timestamp":1}"#,
            "\n\n",
            r#"{"messageId":"m2","userId":"u2","event":"login","timestamp":2}"#,
            "\n"
        );
        let events = parse_events(lines).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, "login");

        assert!(parse_events("{not json}").is_err());
    }
}
