use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Table};
use nurture_core::AppCore;
use nurture_core::models::{FlowDefinition, FlowStatus, ValidationIssue, ValidationSeverity};
use nurture_core::services::flow as flows;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::cli::{FlowCommands, OutputFormat};
use crate::output::json::print_json;
use crate::output::table::print_table;
use crate::output::{format_timestamp, short_id};

pub async fn run(core: Arc<AppCore>, command: FlowCommands, format: OutputFormat) -> Result<()> {
    match command {
        FlowCommands::List { status } => list_flows(&core, status.map(FlowStatus::from), format),
        FlowCommands::Show { id } => show_flow(&core, &id, format),
        FlowCommands::Create { name } => {
            let flow = flows::create_flow(&core, &name)?;
            print_flow_summary(&flow, "Created", format)
        }
        FlowCommands::Import { file } => import_flow(&core, &file, format),
        FlowCommands::Export { id } => print_json(&flows::get_flow(&core, &id)?),
        FlowCommands::Validate { id, file } => {
            let flow = match (id, file) {
                (_, Some(file)) => read_flow_file(&file)?,
                (Some(id), None) => flows::get_flow(&core, &id)?,
                (None, None) => anyhow::bail!("Pass a flow id or --file"),
            };
            validate_flow(&core, &flow, format)
        }
        FlowCommands::Activate { id } => {
            let activation = flows::activate_flow(&core, &id)?;
            print_activation(activation, "Activated", format)
        }
        FlowCommands::Pause { id } => {
            let flow = flows::pause_flow(&core, &id)?;
            print_flow_summary(&flow, "Paused", format)
        }
        FlowCommands::Resume { id } => {
            let activation = flows::resume_flow(&core, &id)?;
            print_activation(activation, "Resumed", format)
        }
        FlowCommands::Archive { id } => {
            let flow = flows::archive_flow(&core, &id)?;
            print_flow_summary(&flow, "Archived", format)
        }
        FlowCommands::Duplicate { id } => {
            let flow = flows::duplicate_flow(&core, &id)?;
            print_flow_summary(&flow, "Duplicated as", format)
        }
        FlowCommands::Delete { id } => delete_flow(&core, &id, format),
    }
}

fn list_flows(core: &AppCore, status: Option<FlowStatus>, format: OutputFormat) -> Result<()> {
    let mut flows: Vec<FlowDefinition> = flows::list_flows(core)?
        .into_iter()
        .filter(|flow| status.is_none_or(|s| flow.status == s))
        .collect();
    flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    if format.is_json() {
        return print_json(&flows);
    }

    if flows.is_empty() {
        println!("No flows found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Status", "Version", "Active", "Enrolled", "Updated"]);
    for flow in flows {
        table.add_row(vec![
            Cell::new(short_id(&flow.id)),
            Cell::new(&flow.name),
            Cell::new(flow.status.as_str()),
            Cell::new(flow.version),
            Cell::new(flow.metrics.active),
            Cell::new(flow.metrics.enrolled),
            Cell::new(format_timestamp(flow.updated_at)),
        ]);
    }
    print_table(table)
}

fn show_flow(core: &AppCore, id: &str, format: OutputFormat) -> Result<()> {
    let flow = flows::get_flow(core, id)?;

    if format.is_json() {
        return print_json(&flow);
    }

    println!("ID:          {}", flow.id);
    println!("Name:        {}", flow.name);
    if !flow.description.is_empty() {
        println!("Description: {}", flow.description);
    }
    println!("Status:      {}", flow.status.as_str());
    println!("Version:     {}", flow.version);
    if let Some((node, trigger)) = flow.trigger() {
        println!("Trigger:     {} ({})", trigger.kind.as_str(), node.id);
    }
    println!("Updated:     {}", format_timestamp(flow.updated_at));

    let metrics = &flow.metrics;
    println!();
    println!(
        "Enrolled {}  Active {}  Completed {}  Exited {}  Errored {}",
        metrics.enrolled, metrics.active, metrics.completed, metrics.exited, metrics.errored
    );
    for (variant, count) in &metrics.variant_assignments {
        println!("  variant {variant}: {count}");
    }

    println!();
    let mut table = Table::new();
    table.set_header(vec!["Node", "Type", "Label", "Next"]);
    for node in &flow.nodes {
        let next: Vec<String> = flow
            .outgoing(&node.id)
            .map(|edge| match &edge.source_handle {
                Some(handle) => format!("{handle} -> {}", edge.target),
                None => edge.target.clone(),
            })
            .collect();
        table.add_row(vec![
            Cell::new(&node.id),
            Cell::new(node.node_type().as_str()),
            Cell::new(&node.label),
            Cell::new(next.join(", ")),
        ]);
    }
    print_table(table)
}

fn import_flow(core: &AppCore, file: &Path, format: OutputFormat) -> Result<()> {
    let mut flow = read_flow_file(file)?;
    if flow.id.trim().is_empty() {
        flow.id = uuid::Uuid::new_v4().to_string();
    }
    // Import overwrites: take whatever version is stored.
    flow.version = core
        .storage
        .flows
        .get(&flow.id)?
        .map(|stored| stored.version)
        .unwrap_or(0);

    let saved = flows::save_flow(core, &flow)?;
    let issues = flows::check_flow(core, &saved);

    if format.is_json() {
        return print_json(&json!({ "flow": saved, "issues": issues }));
    }

    println!(
        "{} {} ({}) version {}",
        "Imported".green(),
        saved.name,
        saved.id,
        saved.version
    );
    print_issues(&issues);
    Ok(())
}

fn validate_flow(core: &AppCore, flow: &FlowDefinition, format: OutputFormat) -> Result<()> {
    let issues = flows::check_flow(core, flow);

    if format.is_json() {
        return print_json(&json!({
            "flowId": flow.id,
            "activatable": !nurture_core::validation::has_blocking_issues(&issues),
            "issues": issues,
        }));
    }

    if issues.is_empty() {
        println!("{} {} has no issues.", "OK".green().bold(), flow.name);
        return Ok(());
    }
    print_issues(&issues);
    if nurture_core::validation::has_blocking_issues(&issues) {
        println!("\n{}", "Flow cannot be activated until blocking issues are fixed.".red());
    }
    Ok(())
}

fn delete_flow(core: &AppCore, id: &str, format: OutputFormat) -> Result<()> {
    let removed = flows::delete_flow(core, id)?;

    if format.is_json() {
        return print_json(&json!({ "deleted": true, "enrollmentsRemoved": removed }));
    }

    println!("Deleted flow {id} and {removed} enrollment(s).");
    Ok(())
}

fn read_flow_file(file: &Path) -> Result<FlowDefinition> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid flow definition", file.display()))
}

fn print_activation(
    activation: flows::Activation,
    verb: &str,
    format: OutputFormat,
) -> Result<()> {
    if format.is_json() {
        return print_json(&json!({ "flow": activation.flow, "issues": activation.issues }));
    }
    print_flow_summary(&activation.flow, verb, format)?;
    print_issues(&activation.issues);
    Ok(())
}

fn print_flow_summary(flow: &FlowDefinition, verb: &str, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(flow);
    }
    println!(
        "{} {} ({}) [{}]",
        verb.green(),
        flow.name,
        flow.id,
        flow.status.as_str()
    );
    Ok(())
}

fn print_issues(issues: &[ValidationIssue]) {
    for issue in issues {
        let label = match issue.severity {
            ValidationSeverity::Error => "error".red().bold(),
            ValidationSeverity::Integration => "integration".magenta().bold(),
            ValidationSeverity::Warning => "warning".yellow().bold(),
        };
        match &issue.node_id {
            Some(node_id) => println!("{label} [{node_id}] {}", issue.message),
            None => println!("{label} {}", issue.message),
        }
    }
}
