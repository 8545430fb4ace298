mod cli;
mod commands;
mod completions;
mod config;
mod error;
mod output;
mod paths;
mod setup;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use setup::{init_logging, prepare_core};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error::handle_error(err);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    if let Commands::Completions { shell } = command {
        completions::generate_completions(shell);
        return Ok(());
    }

    let config = config::CliConfig::load();
    let _guard = init_logging(&config, cli.verbose, matches!(command, Commands::Run(_)))?;
    let core = prepare_core(cli.db_path, &config)?;
    let format = cli.format;

    match command {
        Commands::Flow { command } => commands::flow::run(core, command, format).await,
        Commands::Event { command } => commands::event::run(core, command, format).await,
        Commands::User { command } => commands::user::run(core, command, format).await,
        Commands::Trigger { command } => commands::trigger::run(core, command, format).await,
        Commands::Enrollment { command } => {
            commands::enrollment::run(core, command, format).await
        }
        Commands::Config { command } => commands::config::run(core, command, format).await,
        Commands::Tick => commands::engine::tick(core, format).await,
        Commands::Run(args) => commands::engine::run(core, args).await,
        Commands::Completions { .. } => Ok(()),
    }
}
