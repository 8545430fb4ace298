use anyhow::Result;
use comfy_table::{Cell, Table};
use nurture_core::AppCore;
use nurture_core::models::{EnrollmentStatus, FlowEnrollment};
use nurture_core::services::enrollment as enrollments;
use serde_json::Value;
use std::sync::Arc;

use crate::cli::{EnrollmentCommands, OutputFormat};
use crate::commands::shared::truncate;
use crate::output::json::print_json;
use crate::output::table::print_table;
use crate::output::{format_optional_timestamp, format_timestamp, short_id};

pub async fn run(
    core: Arc<AppCore>,
    command: EnrollmentCommands,
    format: OutputFormat,
) -> Result<()> {
    match command {
        EnrollmentCommands::List { flow, user, status } => {
            let status = status.map(EnrollmentStatus::from);
            let list = match (flow, user) {
                (Some(flow_id), _) => enrollments::list_for_flow(&core, &flow_id, status)?,
                (None, Some(user_id)) => enrollments::list_for_user(&core, &user_id)?
                    .into_iter()
                    .filter(|e| status.is_none_or(|s| e.status == s))
                    .collect(),
                (None, None) => anyhow::bail!("Pass --flow or --user"),
            };
            list_enrollments(list, format)
        }
        EnrollmentCommands::Show { id } => {
            let enrollment = enrollments::get_enrollment(&core, &id)?;
            show_enrollment(&enrollment, format)
        }
    }
}

fn list_enrollments(list: Vec<FlowEnrollment>, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(&list);
    }

    if list.is_empty() {
        println!("No enrollments found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Flow", "User", "Status", "Node", "Next", "Entered"]);
    for enrollment in &list {
        table.add_row(vec![
            Cell::new(short_id(&enrollment.id)),
            Cell::new(short_id(&enrollment.flow_id)),
            Cell::new(&enrollment.user_id),
            Cell::new(enrollment.status.as_str()),
            Cell::new(&enrollment.current_node_id),
            Cell::new(format_optional_timestamp(enrollment.next_process_at)),
            Cell::new(format_timestamp(enrollment.entered_at)),
        ]);
    }
    print_table(table)
}

fn show_enrollment(enrollment: &FlowEnrollment, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(enrollment);
    }

    println!("ID:          {}", enrollment.id);
    println!("Flow:        {} (v{})", enrollment.flow_id, enrollment.flow_version);
    println!("User:        {}", enrollment.user_id);
    println!("Status:      {}", enrollment.status.as_str());
    println!("Node:        {}", enrollment.current_node_id);
    println!("Entered:     {}", format_timestamp(enrollment.entered_at));
    println!(
        "Next:        {}",
        format_optional_timestamp(enrollment.next_process_at)
    );
    if enrollment.attempts > 0 {
        println!("Attempts:    {}", enrollment.attempts);
    }
    if let Some(error) = &enrollment.last_error {
        println!("Last error:  {error}");
    }
    if let Some(reason) = &enrollment.exit_reason {
        println!("Exit reason: {reason}");
    }
    if let Some(finished) = enrollment.finished_at {
        println!("Finished:    {}", format_timestamp(finished));
    }
    for (node, variant) in &enrollment.split_assignments {
        println!("Split {node}: variant {variant}");
    }
    for (node, count) in &enrollment.loop_counts {
        println!("Loops to {node}: {count}");
    }
    if !enrollment.variables.is_empty() {
        let variables = Value::Object(enrollment.variables.clone()).to_string();
        println!("Variables:   {}", truncate(&variables, 100));
    }
    Ok(())
}
