//! Error types for satchel-core

use thiserror::Error;

use crate::gateway::GatewayError;

/// Result type alias using satchel-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in satchel-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local replica store error
    #[error("Store error: {0}")]
    Store(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Classified failure returned by the remote gateway
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Failure scoped to one collection during a sync run
    #[error("Sync of '{collection}' failed: {source}")]
    Collection {
        collection: String,
        #[source]
        source: GatewayError,
    },

    /// A sync run is already in flight on this orchestrator
    #[error("A sync is already in progress")]
    AlreadySyncing,
}

impl Error {
    /// Returns the gateway classification behind this error, if any.
    pub const fn gateway(&self) -> Option<&GatewayError> {
        match self {
            Self::Gateway(error) | Self::Collection { source: error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether this error is an authorization failure reported by the remote.
    pub fn is_unauthorized(&self) -> bool {
        self.gateway().is_some_and(GatewayError::is_unauthorized)
    }
}
