use std::path::Path;

use satchel_core::util::unix_millis_now;
use satchel_core::{LocalStore, SqliteStore};

use crate::commands::common::{ensure_collection, format_record_lines, load_config, ConfigMode};
use crate::error::CliError;

pub async fn run_list(
    collection: &str,
    limit: usize,
    include_deleted: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let config = load_config(ConfigMode::LocalOnly, true)?;
    ensure_collection(&config, collection)?;

    let store = SqliteStore::open(db_path)?;
    let records = store
        .get_all(collection)
        .await?
        .into_iter()
        .filter(|record| include_deleted || !record.deleted)
        .take(limit)
        .collect::<Vec<_>>();

    if as_json {
        let json_items = records
            .iter()
            .map(satchel_core::SyncRecord::to_json)
            .collect::<Result<Vec<_>, _>>()?;
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_record_lines(&records, unix_millis_now()) {
            println!("{line}");
        }
    }

    Ok(())
}
