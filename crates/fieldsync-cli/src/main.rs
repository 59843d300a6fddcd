//! fieldsync CLI - Capture field reports from the terminal
//!
//! Reports are cached locally first and synced when the submit endpoint is
//! reachable.

mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_config_path, resolve_db_path, Context};
use crate::commands::config::run_config;
use crate::commands::delete::{run_clear_synced, run_delete};
use crate::commands::list::run_list;
use crate::commands::status::run_status;
use crate::commands::sync::{run_retry, run_sync};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let context = Context {
        db_path: resolve_db_path(cli.db_path),
        config_path: resolve_config_path(cli.config),
        offline: cli.offline,
    };

    match cli.command {
        Some(Commands::Add { fields, json }) => {
            run_add(&fields, json.as_deref(), &context.open().await?).await?;
        }
        Some(Commands::List { status, json }) => {
            run_list(status, json, &context.open().await?).await?;
        }
        Some(Commands::Status { json }) => run_status(json, &context.open().await?).await?,
        Some(Commands::Sync { id }) => run_sync(id.as_deref(), &context.open().await?).await?,
        Some(Commands::Retry) => run_retry(&context.open().await?).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &context.open().await?).await?,
        Some(Commands::ClearSynced) => run_clear_synced(&context.open().await?).await?,
        Some(Commands::Watch) => run_watch(&context.open().await?).await?,
        Some(Commands::Config { command }) => run_config(command, &context.config_path)?,
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}

fn init_tracing() -> Result<(), CliError> {
    let directive = "fieldsync=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
