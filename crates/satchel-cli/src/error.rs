use std::io;

use satchel_core::sync::SchedulerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] satchel_core::Error),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record payload provided")]
    EmptyInput,
    #[error("Invalid record payload: {0}")]
    InvalidRecord(String),
    #[error("Record id cannot be empty")]
    EmptyRecordId,
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error("Remote is not reachable")]
    NotConnected,
    #[error("Remote init reported failure: {0}")]
    InitFailed(String),
    #[error("Sync finished with failures in: {0}")]
    SyncFailed(String),
}
