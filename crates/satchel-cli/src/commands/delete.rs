use std::path::Path;

use crate::commands::common::{
    ensure_collection, load_config, normalize_record_ids, open_orchestrator, ConfigMode,
};
use crate::error::CliError;

pub async fn run_delete(collection: &str, ids: &[String], db_path: &Path) -> Result<(), CliError> {
    let ids = normalize_record_ids(ids)?;
    let config = load_config(ConfigMode::LocalOnly, true)?;
    ensure_collection(&config, collection)?;
    let orchestrator = open_orchestrator(db_path, &config)?;

    let deleted = orchestrator.delete_local(collection, &ids).await?;
    println!("Marked {deleted} record(s) deleted in {collection}");
    Ok(())
}
