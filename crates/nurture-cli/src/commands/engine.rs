use anyhow::{Context, Result};
use nurture_core::AppCore;
use nurture_core::engine::EngineRunner;
use nurture_storage::time_utils;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cli::{OutputFormat, RunArgs};
use crate::output::json::print_json;

/// One sweep plus one scheduler pass.
pub async fn tick(core: Arc<AppCore>, format: OutputFormat) -> Result<()> {
    let report = core.engine.tick(time_utils::now_ms()).await?;

    if format.is_json() {
        return print_json(&report);
    }

    let sweep = &report.sweep;
    let process = &report.process;
    if report.events_resumed > 0 {
        println!("Events: {} unfinished event(s) processed", report.events_resumed);
    }
    println!(
        "Triggers: {} schedule(s) fired, {} date sweep(s), {} enrolled",
        sweep.schedules_fired, sweep.dates_swept, sweep.enrolled
    );
    println!(
        "Enrollments: {} due, {} processed in {} step(s), {} conflict(s)",
        process.due, process.processed, process.steps, process.conflicts
    );
    println!(
        "Finished: {} completed, {} exited, {} errored",
        process.completed, process.exited, process.errored
    );
    if process.failures > 0 {
        println!("{} enrollment(s) failed on storage errors; see the log", process.failures);
    }
    Ok(())
}

/// Run the engine loop until Ctrl-C.
pub async fn run(core: Arc<AppCore>, args: RunArgs) -> Result<()> {
    let mut runner = EngineRunner::new(core.engine.clone());
    if let Some(ms) = args.poll_interval_ms {
        runner = runner.with_poll_interval(Duration::from_millis(ms.max(1)));
    }
    let handle = Arc::new(runner).start();

    println!("Nurture engine running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutdown requested");
    handle.stop().await?;
    Ok(())
}
