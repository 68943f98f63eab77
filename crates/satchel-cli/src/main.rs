//! Satchel CLI - inspect and sync the local replica from the terminal.

use clap::Parser;

mod cli;
mod commands;
mod error;

use cli::{Cli, Commands, SyncCommands};
use commands::common::resolve_db_path;
use commands::delete::run_delete;
use commands::list::run_list;
use commands::put::run_put;
use commands::remote::{run_check, run_init};
use commands::status::run_status;
use commands::sync::{run_force_push, run_sync, run_sync_conflicts};
use commands::watch::run_watch;
use error::CliError;

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
                .add_directive("satchel_cli=info".parse().unwrap())
                .add_directive("satchel_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let offline = cli.offline;

    match cli.command {
        Commands::Sync { mode, command } => match command {
            Some(SyncCommands::Conflicts { limit, json }) => {
                run_sync_conflicts(limit, json, &db_path).await?;
            }
            Some(SyncCommands::ForcePush { collection }) => {
                run_force_push(&collection, offline, &db_path).await?;
            }
            None => run_sync(mode.into(), offline, &db_path).await?,
        },
        Commands::Check => run_check(offline, &db_path).await?,
        Commands::Init => run_init(offline, &db_path).await?,
        Commands::Status { json } => run_status(json, &db_path).await?,
        Commands::List {
            collection,
            limit,
            all,
            json,
        } => run_list(&collection, limit, all, json, &db_path).await?,
        Commands::Put { collection, json } => run_put(&collection, json.as_deref(), &db_path).await?,
        Commands::Delete { collection, ids } => run_delete(&collection, &ids, &db_path).await?,
        Commands::Watch { interval_secs } => run_watch(interval_secs, offline, &db_path).await?,
    }

    Ok(())
}
