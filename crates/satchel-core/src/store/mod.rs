//! Local replica store
//!
//! The core consumes the replica only through [`LocalStore`]. Writes are
//! whole-record overwrites keyed by `(collection, id)`; there is no partial
//! patching.

mod memory;
mod migrations;
mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{SyncConflict, SyncRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage operations the sync core needs from a local replica.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// All records of a collection, soft-deleted ones included.
    async fn get_all(&self, collection: &str) -> Result<Vec<SyncRecord>>;

    /// Records with unpushed changes (`is_synced == false`).
    async fn get_dirty(&self, collection: &str) -> Result<Vec<SyncRecord>>;

    /// Records with the given ids; unknown ids are skipped.
    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<SyncRecord>>;

    /// Insert or fully overwrite records, keyed by id.
    async fn upsert_many(&self, collection: &str, records: &[SyncRecord]) -> Result<()>;

    /// Physically remove records. Local cleanup only; sync uses `deleted`.
    async fn delete_many(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// Append entries to the conflict journal.
    async fn record_conflicts(&self, conflicts: &[SyncConflict]) -> Result<()>;

    /// Most recent conflict journal entries, newest first.
    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;

    /// Number of dirty records in a collection.
    async fn count_dirty(&self, collection: &str) -> Result<usize> {
        Ok(self.get_dirty(collection).await?.len())
    }
}
