use anyhow::{Context, Result};
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("Failed to encode output as JSON")?;
    println!("{output}");
    Ok(())
}
