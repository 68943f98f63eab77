//! `SQLite`-backed local replica

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{migrations, LocalStore};
use crate::error::{Error, Result};
use crate::models::{SyncConflict, SyncRecord};

const RECORD_COLUMNS: &str = "id, version, last_modified, is_synced, deleted, body";

/// Local replica stored in a single `records` table keyed by `(collection, id)`.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a replica at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory replica (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        Self::configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        // In-memory databases refuse WAL; that is fine.
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "cache_size", 10_000).ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    fn parse_record(row: &Row<'_>) -> rusqlite::Result<(SyncRecord, String)> {
        let record = SyncRecord {
            id: row.get(0)?,
            version: row.get(1)?,
            last_modified: row.get(2)?,
            is_synced: row.get(3)?,
            deleted: row.get(4)?,
            fields: Map::new(),
        };
        Ok((record, row.get(5)?))
    }

    fn with_body((mut record, body): (SyncRecord, String)) -> Result<SyncRecord> {
        record.fields = match serde_json::from_str::<Value>(&body)? {
            Value::Object(map) => map,
            _ => {
                return Err(Error::Store(format!(
                    "record '{}' has a non-object body",
                    record.id
                )))
            }
        };
        Ok(record)
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<SyncRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::with_body).collect()
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<SyncRecord>> {
        let conn = self.conn.lock().await;
        Self::query_records(
            &conn,
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ?1 ORDER BY rowid"),
            params![collection],
        )
    }

    async fn get_dirty(&self, collection: &str) -> Result<Vec<SyncRecord>> {
        let conn = self.conn.lock().await;
        Self::query_records(
            &conn,
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE collection = ?1 AND is_synced = 0
                 ORDER BY rowid"
            ),
            params![collection],
        )
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<SyncRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ?1 AND id = ?2"
        ))?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = stmt
                .query_row(params![collection, id], Self::parse_record)
                .optional()?
            {
                records.push(Self::with_body(row)?);
            }
        }
        Ok(records)
    }

    async fn upsert_many(&self, collection: &str, records: &[SyncRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (collection, id, version, last_modified, is_synced, deleted, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    version = excluded.version,
                    last_modified = excluded.last_modified,
                    is_synced = excluded.is_synced,
                    deleted = excluded.deleted,
                    body = excluded.body",
            )?;
            for record in records {
                let body = serde_json::to_string(&record.fields)?;
                stmt.execute(params![
                    collection,
                    record.id,
                    record.version,
                    record.last_modified,
                    record.is_synced,
                    record.deleted,
                    body
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete_many(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM records WHERE collection = ?1 AND id = ?2")?;
            for id in ids {
                stmt.execute(params![collection, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn record_conflicts(&self, conflicts: &[SyncConflict]) -> Result<()> {
        if conflicts.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sync_conflicts
                    (collection, record_id, local_version, remote_version, resolved_at, strategy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for conflict in conflicts {
                stmt.execute(params![
                    conflict.collection,
                    conflict.record_id,
                    conflict.local_version,
                    conflict.remote_version,
                    conflict.resolved_at,
                    conflict.strategy
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT collection, record_id, local_version, remote_version, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conflicts = stmt
            .query_map(params![limit], |row| {
                Ok(SyncConflict {
                    collection: row.get(0)?,
                    record_id: row.get(1)?,
                    local_version: row.get(2)?,
                    remote_version: row.get(3)?,
                    resolved_at: row.get(4)?,
                    strategy: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    async fn count_dirty(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1 AND is_synced = 0",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(id: &str, version: i64, synced: bool) -> SyncRecord {
        let mut record = SyncRecord::new(
            id,
            json!({"name": id}).as_object().cloned().unwrap_or_default(),
        );
        record.version = version;
        record.is_synced = synced;
        record
    }

    #[tokio::test]
    async fn upsert_and_read_back_whole_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original = record("s1", 1, false);
        store.upsert_many("students", &[original.clone()]).await.unwrap();

        let all = store.get_all("students").await.unwrap();
        assert_eq!(all, vec![original]);
        assert!(store.get_all("classes").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_overwrites_without_patching() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut first = record("s1", 1, false);
        first.fields.insert("nickname".to_string(), json!("Yu"));
        store.upsert_many("students", &[first]).await.unwrap();

        let second = record("s1", 2, true);
        store.upsert_many("students", &[second.clone()]).await.unwrap();

        let all = store.get_all("students").await.unwrap();
        assert_eq!(all, vec![second]);
    }

    #[tokio::test]
    async fn dirty_filter_selects_unsynced_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_many(
                "students",
                &[record("s1", 1, false), record("s2", 2, true), record("s3", 1, false)],
            )
            .await
            .unwrap();

        let dirty: Vec<String> = store
            .get_dirty("students")
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(dirty, vec!["s1".to_string(), "s3".to_string()]);
        assert_eq!(store.count_dirty("students").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn get_many_skips_unknown_ids_and_delete_removes_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_many("students", &[record("s1", 1, true), record("s2", 1, true)])
            .await
            .unwrap();

        let found = store
            .get_many("students", &["s2".to_string(), "zz".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "s2");

        store
            .delete_many("students", &["s1".to_string()])
            .await
            .unwrap();
        assert_eq!(store.get_all("students").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conflict_journal_lists_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut older = SyncConflict::version_lww("scores", "a", 2, 3);
        older.resolved_at = 10;
        let mut newer = SyncConflict::version_lww("scores", "b", 4, 5);
        newer.resolved_at = 20;
        store.record_conflicts(&[older, newer]).await.unwrap();

        let conflicts = store.list_conflicts(1).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].record_id, "b");
    }

    #[tokio::test]
    async fn replica_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("replica.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .upsert_many("classes", &[record("c1", 3, true)])
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let all = reopened.get_all("classes").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, 3);
    }
}
