use colored::Colorize;
use nurture_core::NurtureError;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(NurtureError::ActivationBlocked { issues }) = err.downcast_ref::<NurtureError>() {
        for issue in issues.iter().filter(|issue| issue.blocks_activation()) {
            let location = issue
                .node_id
                .as_deref()
                .map(|id| format!(" [{id}]"))
                .unwrap_or_default();
            eprintln!("  {} {}{}", "-".dimmed(), issue.message, location);
        }
    }

    if is_database_locked(&err) {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Another nurture process holds the database. Stop it or use --db-path.");
    }

    let msg = err.to_string().to_lowercase();

    if msg.contains("flow not found") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  List available flows with:");
        eprintln!("  {} nurture flow list", "$".dimmed());
    }

    if msg.contains("version conflict") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  The flow changed since it was read. Export it again and retry.");
    }

    std::process::exit(1);
}

fn is_database_locked(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<redb::DatabaseError>(),
            Some(redb::DatabaseError::DatabaseAlreadyOpen)
        )
    })
}
