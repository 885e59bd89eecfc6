//! Caliber CLI - Inspect and drive the CaliberVault offline sync queue
//!
//! Everything the apps do offline goes through the same local database, so
//! the CLI can show what is queued, push it, and settle conflicts by hand.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{CacheCommands, Cli, Commands};
use crate::commands::common::resolve_db_path;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "caliber=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let db_path = resolve_db_path(cli.db_path)?;

    match cli.command {
        Commands::Enqueue {
            kind,
            entity_kind,
            payload,
        } => commands::enqueue::run_enqueue(kind, &entity_kind, payload, &db_path).await,
        Commands::Create { entity_kind, data } => {
            commands::enqueue::run_create(&entity_kind, data, &db_path).await
        }
        Commands::Update {
            entity_kind,
            id,
            patch,
        } => commands::enqueue::run_update(&entity_kind, &id, patch, &db_path).await,
        Commands::Delete { entity_kind, id } => {
            commands::enqueue::run_delete(&entity_kind, &id, &db_path).await
        }
        Commands::Queue { failed, json } => {
            commands::queue::run_queue(failed, json, &db_path).await
        }
        Commands::Status { json } => commands::status::run_status(json, &db_path).await,
        Commands::Sync { strategy, json } => {
            commands::sync::run_sync(strategy, json, &db_path).await
        }
        Commands::Watch {
            probe_interval,
            strategy,
        } => commands::sync::run_watch(probe_interval, strategy, &db_path).await,
        Commands::Retry { id } => commands::recover::run_retry(&id, &db_path).await,
        Commands::Discard { id } => commands::recover::run_discard(&id, &db_path).await,
        Commands::Conflicts { log, limit, json } => {
            commands::conflicts::run_conflicts(log, limit, json, &db_path).await
        }
        Commands::Resolve {
            id,
            choice,
            payload,
        } => commands::conflicts::run_resolve(&id, choice, payload.as_deref(), &db_path).await,
        Commands::Cache { command } => match command {
            CacheCommands::List {
                entity_kind,
                dirty,
                filter,
                json,
            } => {
                commands::cache::run_cache_list(
                    &entity_kind,
                    dirty,
                    filter.as_deref(),
                    json,
                    &db_path,
                )
                .await
            }
            CacheCommands::Get { entity_kind, id } => {
                commands::cache::run_cache_get(&entity_kind, &id, &db_path).await
            }
        },
        Commands::Pull { entity_kind } => commands::sync::run_pull(&entity_kind, &db_path).await,
        Commands::Reset { yes } => commands::status::run_reset(yes, &db_path).await,
        Commands::Completions { shell, output } => {
            commands::completions::run_completions(shell, output.as_deref())
        }
    }
}
