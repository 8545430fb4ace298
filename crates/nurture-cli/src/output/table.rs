use anyhow::Result;
use comfy_table::presets::UTF8_HORIZONTAL_ONLY;
use comfy_table::{ContentArrangement, Table};

/// Print with the compact horizontal-rule style used by every listing.
pub fn print_table(mut table: Table) -> Result<()> {
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic);
    println!("{table}");
    Ok(())
}
