//! In-memory local replica

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::LocalStore;
use crate::error::Result;
use crate::models::{SyncConflict, SyncRecord};

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<SyncRecord>>,
    conflicts: Vec<SyncConflict>,
}

/// Volatile replica keeping records in insertion order per collection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<SyncRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_dirty(&self, collection: &str) -> Result<Vec<SyncRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| record.is_dirty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<SyncRecord>> {
        let inner = self.inner.read().await;
        let Some(records) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| records.iter().find(|record| &record.id == id))
            .cloned()
            .collect())
    }

    async fn upsert_many(&self, collection: &str, records: &[SyncRecord]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let stored = inner.collections.entry(collection.to_string()).or_default();
        for record in records {
            match stored.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn delete_many(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(stored) = inner.collections.get_mut(collection) {
            stored.retain(|record| !ids.contains(&record.id));
        }
        Ok(())
    }

    async fn record_conflicts(&self, conflicts: &[SyncConflict]) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.conflicts.extend_from_slice(conflicts);
        Ok(())
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let inner = self.inner.read().await;
        let mut conflicts = inner.conflicts.clone();
        conflicts.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at));
        conflicts.truncate(limit);
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn record(id: &str, synced: bool) -> SyncRecord {
        let mut record = SyncRecord::new(id, Map::new());
        record.is_synced = synced;
        record
    }

    #[tokio::test]
    async fn keeps_insertion_order_and_overwrites_in_place() {
        let store = MemoryStore::new();
        store
            .upsert_many("classes", &[record("b", false), record("a", false)])
            .await
            .unwrap();
        store
            .upsert_many("classes", &[record("b", true)])
            .await
            .unwrap();

        let all = store.get_all("classes").await.unwrap();
        let ids: Vec<&str> = all.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(all[0].is_synced);
        assert_eq!(store.count_dirty("classes").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_many_removes_only_named_ids() {
        let store = MemoryStore::new();
        store
            .upsert_many("classes", &[record("a", true), record("b", true)])
            .await
            .unwrap();
        store
            .delete_many("classes", &["a".to_string()])
            .await
            .unwrap();

        let all = store.get_all("classes").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "b");
    }
}
