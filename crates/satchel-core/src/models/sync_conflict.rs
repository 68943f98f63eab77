//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Strategy name recorded for version-based last-writer-wins resolutions.
pub const VERSION_LWW: &str = "version-lww";

/// A dirty local record that a pull replaced with a newer remote version.
///
/// The local edit is lost; the journal entry is kept so it can be reviewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Collection the record belongs to
    pub collection: String,
    /// Record involved in the conflict
    pub record_id: String,
    /// Version of the unsynced local edit that was discarded
    pub local_version: i64,
    /// Remote version that replaced it
    pub remote_version: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}

impl SyncConflict {
    pub fn version_lww(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        local_version: i64,
        remote_version: i64,
    ) -> Self {
        Self {
            collection: collection.into(),
            record_id: record_id.into(),
            local_version,
            remote_version,
            resolved_at: crate::util::unix_millis_now(),
            strategy: VERSION_LWW.to_string(),
        }
    }
}
