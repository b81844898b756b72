//! Sisa CLI - administrative front-end for the offline sync store
//!
//! Pull server collections, drain the queue and inspect local state.

mod cli;
mod commands;
mod config_file;
mod error;
#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use tracing_subscriber::filter::LevelFilter;

use crate::cli::{Cli, Commands};
use crate::commands::common::open_service;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::errors::run_errors;
use crate::commands::mirror::run_mirror;
use crate::commands::queue::run_queue;
use crate::commands::record::run_record;
use crate::commands::status::run_status;
use crate::commands::sync::{run_drain, run_catch_up, run_pull, run_sync};
use crate::config_file::{effective_config, resolve_config_path, resolve_db_path};
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

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sisa=info".parse().unwrap_or_else(|_| LevelFilter::INFO.into())),
        )
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);

    let command = match cli.command {
        None => {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
        Some(Commands::Completions { shell, output }) => {
            return run_completions(shell, output.as_deref());
        }
        Some(Commands::Config { command }) => {
            return run_config(command, &config_path, cli.db_path);
        }
        Some(command) => command,
    };

    let config = effective_config(&config_path, cli.db_path, |name| std::env::var(name).ok())
        .map_err(CliError::Config)?;
    let db_path = resolve_db_path(&config);
    tracing::debug!("Using local store at {}", db_path.display());
    let service = open_service(&config, &db_path).await?;

    let result = match command {
        Commands::Pull { table, json } => run_pull(&service, table.as_deref(), json).await,
        Commands::Drain { table, json } => run_drain(&service, table.as_deref(), json).await,
        Commands::Sync { json } => run_sync(&service, json).await,
        Commands::CatchUp { json } => run_catch_up(&service, json).await,
        Commands::Status { json } => run_status(&service, json).await,
        Commands::Queue { command } => run_queue(&service, command).await,
        Commands::Errors { command } => run_errors(&service, command).await,
        Commands::Mirror { table, json } => run_mirror(&service, &table, json).await,
        Commands::Record { command } => run_record(&service, command).await,
        Commands::Completions { .. } | Commands::Config { .. } => Ok(()),
    };

    service.close().await?;
    result
}
