use std::path::Path;

use crate::commands::common::{
    format_dirty_count_lines, load_config, open_orchestrator, ConfigMode, DirtyCountItem,
};
use crate::error::CliError;

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let config = load_config(ConfigMode::LocalOnly, true)?;
    let orchestrator = open_orchestrator(db_path, &config)?;
    let counts = orchestrator.dirty_counts().await?;

    if as_json {
        let items = counts
            .iter()
            .map(|(collection, dirty)| DirtyCountItem {
                collection: collection.clone(),
                dirty: *dirty,
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for line in format_dirty_count_lines(&counts) {
        println!("{line}");
    }
    let total: usize = counts.iter().map(|(_, dirty)| dirty).sum();
    println!("{total} record(s) waiting to sync");
    Ok(())
}
