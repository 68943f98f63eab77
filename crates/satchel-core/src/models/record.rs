//! Syncable record model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::util::unix_millis_now;

/// Field names owned by the sync layer rather than by a collection's payload.
pub const META_FIELDS: [&str; 5] = ["id", "version", "lastModified", "isSynced", "deleted"];

const fn initial_version() -> i64 {
    1
}

/// A row of any collection, carrying the sync metadata every collection shares.
///
/// Collection-specific data lives in `fields` and is flattened into the same
/// JSON object as the metadata when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    /// Opaque identifier, stable across local and remote
    pub id: String,
    /// Per-record mutation counter; the authoritative conflict signal
    #[serde(default = "initial_version")]
    pub version: i64,
    /// Last local mutation (Unix ms), advisory only
    #[serde(default)]
    pub last_modified: i64,
    /// True once the remote acknowledged a push of this exact version
    #[serde(default)]
    pub is_synced: bool,
    /// Soft delete flag, propagated like any other mutation
    #[serde(default)]
    pub deleted: bool,
    /// Collection payload
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncRecord {
    /// Create a fresh, unsynced record at version 1.
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut record = Self {
            id: id.into(),
            version: initial_version(),
            last_modified: unix_millis_now(),
            is_synced: false,
            deleted: false,
            fields,
        };
        record.strip_meta_fields();
        record
    }

    /// Create a fresh record with a generated time-sortable id.
    #[must_use]
    pub fn with_generated_id(fields: Map<String, Value>) -> Self {
        Self::new(Uuid::now_v7().to_string(), fields)
    }

    /// Build a record from a JSON object, filling metadata defaults.
    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        let mut record: Self = serde_json::from_value(value)?;
        record.strip_meta_fields();
        Ok(record)
    }

    /// Register a local mutation: bump the version, stamp the time, mark dirty.
    pub fn touch(&mut self) {
        self.version = self.version.max(0).saturating_add(1);
        self.last_modified = unix_millis_now();
        self.is_synced = false;
    }

    /// Soft-delete this record. Deletion is a mutation like any other.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.touch();
    }

    /// Whether the record carries unpushed local changes.
    pub const fn is_dirty(&self) -> bool {
        !self.is_synced
    }

    /// Read a string field from the payload.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Serialize into a single flat JSON object.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn strip_meta_fields(&mut self) {
        for key in META_FIELDS {
            self.fields.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn new_record_starts_dirty_at_version_one() {
        let record = SyncRecord::new("s1", fields(json!({"name": "Ayu"})));
        assert_eq!(record.version, 1);
        assert!(record.is_dirty());
        assert!(!record.deleted);
        assert!(record.last_modified > 0);
    }

    #[test]
    fn touch_bumps_version_and_clears_synced() {
        let mut record = SyncRecord::new("s1", Map::new());
        record.is_synced = true;
        record.touch();
        assert_eq!(record.version, 2);
        assert!(!record.is_synced);
    }

    #[test]
    fn mark_deleted_is_a_versioned_mutation() {
        let mut record = SyncRecord::new("s1", Map::new());
        record.is_synced = true;
        record.mark_deleted();
        assert!(record.deleted);
        assert_eq!(record.version, 2);
        assert!(record.is_dirty());
    }

    #[test]
    fn serializes_flat_camel_case_object() {
        let mut record = SyncRecord::new("s1", fields(json!({"classId": "c1"})));
        record.last_modified = 42;
        let value = record.to_json().unwrap();
        assert_eq!(
            value,
            json!({
                "id": "s1",
                "version": 1,
                "lastModified": 42,
                "isSynced": false,
                "deleted": false,
                "classId": "c1"
            })
        );
    }

    #[test]
    fn from_json_defaults_missing_metadata() {
        let record = SyncRecord::from_json(json!({"id": "s9", "name": "Budi"})).unwrap();
        assert_eq!(record.version, 1);
        assert!(!record.is_synced);
        assert_eq!(record.field_str("name"), Some("Budi"));
        assert!(!record.fields.contains_key("id"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = SyncRecord::with_generated_id(Map::new());
        let b = SyncRecord::with_generated_id(Map::new());
        assert_ne!(a.id, b.id);
    }
}
