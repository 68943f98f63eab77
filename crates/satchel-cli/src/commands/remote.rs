use std::path::Path;

use crate::commands::common::{load_config, open_orchestrator, ConfigMode};
use crate::error::CliError;

pub async fn run_check(offline: bool, db_path: &Path) -> Result<(), CliError> {
    let config = load_config(ConfigMode::RequireRemote, offline)?;
    let orchestrator = open_orchestrator(db_path, &config)?;

    if orchestrator.check().await {
        println!("Connected: {}", config.endpoint);
        Ok(())
    } else {
        Err(CliError::NotConnected)
    }
}

pub async fn run_init(offline: bool, db_path: &Path) -> Result<(), CliError> {
    let config = load_config(ConfigMode::RequireRemote, offline)?;
    let orchestrator = open_orchestrator(db_path, &config)?;

    let outcome = orchestrator.init().await?;
    for step in outcome.details.iter().filter(|step| !step.success) {
        if let Some(error) = step.error.as_deref().or(step.message.as_deref()) {
            println!("  tolerated: {error}");
        }
    }
    if !outcome.success {
        return Err(CliError::InitFailed(outcome.message));
    }

    if outcome.message.is_empty() {
        println!("Remote schema ready");
    } else {
        println!("{}", outcome.message);
    }
    Ok(())
}
