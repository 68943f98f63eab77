use std::collections::HashMap;
use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use satchel_core::models::SyncConflict;
use satchel_core::{
    HttpGateway, SqliteStore, SyncConfig, SyncOrchestrator, SyncRecord, SyncReport,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CliError;

const ENDPOINT_VAR: &str = "SATCHEL_SYNC_ENDPOINT";
const LOCAL_ONLY_ENDPOINT: &str = "http://127.0.0.1/local-only";

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub collection: String,
    pub record_id: String,
    pub local_version: i64,
    pub remote_version: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

#[derive(Debug, Serialize)]
pub struct DirtyCountItem {
    pub collection: String,
    pub dirty: usize,
}

/// Whether a command needs the remote or can run against the replica alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigMode {
    LocalOnly,
    RequireRemote,
}

pub fn load_config(mode: ConfigMode, force_offline: bool) -> Result<SyncConfig, CliError> {
    let values: HashMap<String, String> = env::vars().collect();
    load_config_from(&values, mode, force_offline)
}

pub fn load_config_from(
    values: &HashMap<String, String>,
    mode: ConfigMode,
    force_offline: bool,
) -> Result<SyncConfig, CliError> {
    let endpoint_set = values
        .get(ENDPOINT_VAR)
        .is_some_and(|value| !value.trim().is_empty());

    let mut config = if mode == ConfigMode::LocalOnly && !endpoint_set {
        // No remote configured; local commands still work, nothing goes out.
        let mut config = SyncConfig::from_lookup(|name| {
            if name == ENDPOINT_VAR {
                Some(LOCAL_ONLY_ENDPOINT.to_string())
            } else {
                values.get(name).cloned()
            }
        })?;
        config.offline = true;
        config
    } else {
        SyncConfig::from_lookup(|name| values.get(name).cloned())?
    };

    if force_offline {
        config.offline = true;
    }
    Ok(config)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("SATCHEL_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("satchel")
        .join("replica.db")
}

pub fn open_orchestrator(db_path: &Path, config: &SyncConfig) -> Result<Arc<SyncOrchestrator>, CliError> {
    let store = Arc::new(SqliteStore::open(db_path)?);
    let gateway = Arc::new(HttpGateway::new(config)?);
    Ok(Arc::new(SyncOrchestrator::new(store, gateway, config)))
}

pub fn ensure_collection(config: &SyncConfig, collection: &str) -> Result<(), CliError> {
    if config.registry.get(collection).is_some() {
        Ok(())
    } else {
        Err(CliError::UnknownCollection(collection.to_string()))
    }
}

/// Parse a JSON object or array of objects into records. Missing ids are generated.
pub fn parse_record_payload(raw: &str) -> Result<Vec<SyncRecord>, CliError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CliError::EmptyInput);
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|error| CliError::InvalidRecord(error.to_string()))?;
    let objects = match value {
        Value::Object(object) => vec![object],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(object) => Ok(object),
                other => Err(CliError::InvalidRecord(format!(
                    "expected an object, found {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(CliError::InvalidRecord(format!(
                "expected an object or array, found {other}"
            )))
        }
    };

    objects.into_iter().map(record_from_object).collect()
}

fn record_from_object(mut object: Map<String, Value>) -> Result<SyncRecord, CliError> {
    let has_id = object
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if !has_id {
        let generated = SyncRecord::with_generated_id(Map::new());
        object.insert("id".to_string(), Value::String(generated.id));
    }
    SyncRecord::from_json(Value::Object(object))
        .map_err(|error| CliError::InvalidRecord(error.to_string()))
}

pub fn normalize_record_ids(ids: &[String]) -> Result<Vec<String>, CliError> {
    ids.iter()
        .map(|id| {
            let trimmed = id.trim();
            if trimmed.is_empty() {
                Err(CliError::EmptyRecordId)
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    let trimmed = buffer.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

pub fn format_sync_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.collections.len() + report.failures.len());
    for collection in &report.collections {
        let mut parts = Vec::new();
        if let Some(push) = &collection.push {
            if push.selected > 0 {
                parts.push(format!("pushed {}/{}", push.pushed, push.selected));
            }
        }
        if let Some(pull) = &collection.pull {
            if pull.added + pull.replaced > 0 {
                parts.push(format!("pulled +{} ~{}", pull.added, pull.replaced));
            }
            if pull.conflicts > 0 {
                parts.push(format!("{} conflict(s)", pull.conflicts));
            }
        }
        if !parts.is_empty() {
            lines.push(format!("{:<12} {}", collection.collection, parts.join(", ")));
        }
    }
    for failure in &report.failures {
        lines.push(format!("{:<12} FAILED: {}", failure.collection, failure.cause));
        if let Some(id) = failure.conflict_id() {
            lines.push(format!(
                "{:<12} '{id}' is taken on the remote; rename it locally or run `sync force-push {}`",
                "", failure.collection
            ));
        }
    }
    lines
}

pub fn format_dirty_count_lines(counts: &[(String, usize)]) -> Vec<String> {
    counts
        .iter()
        .map(|(collection, dirty)| format!("{collection:<12} {dirty} unsynced"))
        .collect()
}

pub fn record_preview(record: &SyncRecord, max_chars: usize) -> String {
    let payload = Value::Object(record.fields.clone()).to_string();
    if payload.chars().count() <= max_chars {
        payload
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = payload.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_record_lines(records: &[SyncRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            format!(
                "{}  v{:<3} {:<8} {:<10} {}",
                record.id,
                record.version,
                if record.is_synced { "synced" } else { "dirty" },
                format_relative_time(record.last_modified, now_ms),
                record_preview(record, 60)
            )
        })
        .collect()
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  {}/{}  local=v{} remote=v{}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.collection,
                conflict.record_id,
                conflict.local_version,
                conflict.remote_version
            )
        })
        .collect()
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        collection: conflict.collection.clone(),
        record_id: conflict.record_id.clone(),
        local_version: conflict.local_version,
        remote_version: conflict.remote_version,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
