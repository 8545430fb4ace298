use anyhow::Result;
use nurture_core::AppCore;
use nurture_storage::time_utils;
use serde_json::Map;
use std::sync::Arc;

use crate::cli::{OutputFormat, TriggerCommands};
use crate::commands::shared::parse_object;
use crate::commands::user::print_enrolled;

pub async fn run(core: Arc<AppCore>, command: TriggerCommands, format: OutputFormat) -> Result<()> {
    let now = time_utils::now_ms();
    match command {
        TriggerCommands::Manual { flow_id, user_id } => {
            let created = core.engine.enroll_manually(&flow_id, &user_id, now)?;
            if created.is_none() && !format.is_json() {
                println!("{user_id} was not enrolled (flow inactive, filtered, or already enrolled).");
                return Ok(());
            }
            print_enrolled(&created.into_iter().collect::<Vec<_>>(), format)
        }
        TriggerCommands::Webhook {
            path,
            user_id,
            payload,
        } => {
            let payload = match payload {
                Some(raw) => parse_object(&raw)?,
                None => Map::new(),
            };
            let created = core.engine.receive_webhook(&path, &user_id, payload, now)?;
            print_enrolled(&created, format)
        }
    }
}
