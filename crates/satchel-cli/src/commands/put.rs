use std::path::Path;

use crate::commands::common::{
    ensure_collection, load_config, open_orchestrator, parse_record_payload, read_piped_stdin,
    ConfigMode,
};
use crate::error::CliError;

pub async fn run_put(collection: &str, json: Option<&str>, db_path: &Path) -> Result<(), CliError> {
    let payload = match json {
        Some(json) => json.to_string(),
        None => read_piped_stdin()?.ok_or(CliError::EmptyInput)?,
    };
    let records = parse_record_payload(&payload)?;

    let config = load_config(ConfigMode::LocalOnly, true)?;
    ensure_collection(&config, collection)?;
    let orchestrator = open_orchestrator(db_path, &config)?;

    for record in orchestrator.save_local(collection, records).await? {
        println!("{}  v{}", record.id, record.version);
    }
    Ok(())
}
