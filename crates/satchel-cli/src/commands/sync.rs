use std::path::Path;

use satchel_core::SyncMode;

use crate::commands::common::{
    format_sync_conflict_lines, format_sync_report_lines, load_config, open_orchestrator,
    sync_conflict_to_item, ConfigMode, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(mode: SyncMode, offline: bool, db_path: &Path) -> Result<(), CliError> {
    let config = load_config(ConfigMode::RequireRemote, offline)?;
    let orchestrator = open_orchestrator(db_path, &config)?;

    let report = orchestrator.sync(mode).await?;
    for line in format_sync_report_lines(&report) {
        println!("{line}");
    }

    if !report.is_success() {
        let failed = report
            .failures
            .iter()
            .map(|failure| failure.collection.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(CliError::SyncFailed(failed));
    }

    println!("Sync completed ({mode})");
    Ok(())
}

pub async fn run_force_push(collection: &str, offline: bool, db_path: &Path) -> Result<(), CliError> {
    let config = load_config(ConfigMode::RequireRemote, offline)?;
    let orchestrator = open_orchestrator(db_path, &config)?;

    let report = orchestrator.force_push(collection).await?;
    println!(
        "Force-pushed {} of {} record(s) from {collection}",
        report.pushed, report.selected
    );
    Ok(())
}

pub async fn run_sync_conflicts(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let config = load_config(ConfigMode::LocalOnly, true)?;
    let orchestrator = open_orchestrator(db_path, &config)?;
    let conflicts = orchestrator.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
