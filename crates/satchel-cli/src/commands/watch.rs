use std::path::Path;
use std::time::Duration;

use satchel_core::sync::SyncScheduler;

use crate::commands::common::{load_config, open_orchestrator, ConfigMode};
use crate::error::CliError;

pub async fn run_watch(interval_secs: u64, offline: bool, db_path: &Path) -> Result<(), CliError> {
    let config = load_config(ConfigMode::RequireRemote, offline)?;
    let orchestrator = open_orchestrator(db_path, &config)?;

    let scheduler = SyncScheduler::new(orchestrator, Duration::from_secs(interval_secs));
    scheduler.start().await?;
    println!("Syncing every {interval_secs}s; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    scheduler.stop().await?;
    Ok(())
}
