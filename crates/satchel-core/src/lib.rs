//! satchel-core - offline-first sync core
//!
//! Holds the record model, the local replica store contract and its SQLite
//! implementation, the remote sync gateway, and the engine that pushes dirty
//! records in batches and merges pulled rows by version.

pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use gateway::{GatewayError, HttpGateway, RemoteGateway};
pub use models::{CollectionRegistry, CollectionSchema, RemoteRow, SyncRecord};
pub use state::SyncPhase;
pub use store::{LocalStore, MemoryStore, SqliteStore};
pub use sync::{SyncEvent, SyncMode, SyncOrchestrator, SyncReport};
