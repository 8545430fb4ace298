use anyhow::{Context, Result};
use colored::Colorize;
use nurture_core::AppCore;
use nurture_core::models::{FlowEnrollment, UserProfile};
use nurture_storage::time_utils;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::cli::{OutputFormat, UserCommands};
use crate::commands::shared::parse_properties;
use crate::output::json::print_json;
use crate::output::{format_timestamp, short_id};

pub async fn run(core: Arc<AppCore>, command: UserCommands, format: OutputFormat) -> Result<()> {
    match command {
        UserCommands::Upsert {
            user_id,
            email,
            account_id,
            properties,
            tags,
        } => {
            let properties = parse_properties(&properties)?;
            let now = time_utils::now_ms();
            let profile = core.engine.users().update(&user_id, &mut |profile: &mut UserProfile| {
                if email.is_some() {
                    profile.email = email.clone();
                }
                if account_id.is_some() {
                    profile.account_id = account_id.clone();
                }
                profile
                    .properties
                    .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
                profile.tags.extend(tags.iter().cloned());
                profile.updated_at = now;
            })?;
            // Property changes can invalidate filter-based entry criteria.
            let exited = core.engine.recheck_user(&user_id, now)?;
            print_profile(&profile, exited, format)
        }
        UserCommands::Show { user_id } => {
            let profile = core
                .engine
                .users()
                .get(&user_id)?
                .with_context(|| format!("User not found: {user_id}"))?;
            print_profile(&profile, 0, format)
        }
        UserCommands::Lifecycle { user_id, state } => {
            let created = core
                .engine
                .change_lifecycle(&user_id, &state, time_utils::now_ms())?;
            print_enrolled(&created, format)
        }
        UserCommands::Segment {
            user_id,
            segment_id,
            leave,
        } => {
            let now = time_utils::now_ms();
            if leave {
                let exited = core.engine.leave_segment(&user_id, &segment_id, now)?;
                if format.is_json() {
                    return print_json(&json!({ "left": segment_id, "exited": exited }));
                }
                println!("{user_id} left {segment_id}; {exited} enrollment(s) exited");
                return Ok(());
            }
            let created = core.engine.enter_segment(&user_id, &segment_id, now)?;
            print_enrolled(&created, format)
        }
    }
}

fn print_profile(profile: &UserProfile, exited: usize, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(profile);
    }

    println!("User:        {}", profile.user_id);
    if let Some(email) = &profile.email {
        println!("Email:       {email}");
    }
    if let Some(account) = &profile.account_id {
        println!("Account:     {account}");
    }
    println!(
        "Lifecycle:   {}",
        profile.lifecycle_state.as_deref().unwrap_or("-")
    );
    if !profile.segments.is_empty() {
        let segments: Vec<&str> = profile.segments.iter().map(String::as_str).collect();
        println!("Segments:    {}", segments.join(", "));
    }
    if !profile.tags.is_empty() {
        let tags: Vec<&str> = profile.tags.iter().map(String::as_str).collect();
        println!("Tags:        {}", tags.join(", "));
    }
    if !profile.properties.is_empty() {
        println!(
            "Properties:  {}",
            Value::Object(profile.properties.clone())
        );
    }
    if profile.updated_at > 0 {
        println!("Updated:     {}", format_timestamp(profile.updated_at));
    }
    if exited > 0 {
        println!("{exited} enrollment(s) exited after the update");
    }
    Ok(())
}

pub fn print_enrolled(created: &[FlowEnrollment], format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(&created);
    }

    if created.is_empty() {
        println!("No flows enrolled the user.");
        return Ok(());
    }
    for enrollment in created {
        println!(
            "{} {} into flow {} at node {}",
            "Enrolled".green(),
            enrollment.user_id,
            short_id(&enrollment.flow_id),
            enrollment.current_node_id
        );
    }
    Ok(())
}
