//! `SQLite` tables behind the sync endpoint
//!
//! One `sync_<collection>` table per served collection. The payload is kept as
//! JSON text in `data`; `version`, `deleted` and `updated_at` are real columns
//! so that older databases can be repaired with `migrate`.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::auth::AuthenticatedUser;
use crate::config::{is_sql_identifier, AppConfig};
use crate::error::AppError;

const TOLERATED_DDL_ERRORS: [&str; 2] = ["already exists", "duplicate column"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct InitStepReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InitReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<InitStepReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowOut {
    pub id: String,
    pub data: Map<String, Value>,
    pub updated_at: i64,
    pub version: i64,
}

/// Outcome of a `migrate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnChange {
    Added,
    AlreadyPresent,
}

struct IncomingItem {
    id: String,
    version: i64,
    deleted: bool,
    school_id: Option<String>,
    data: String,
}

#[derive(Clone)]
pub struct RemoteStore {
    conn: Arc<Mutex<Connection>>,
    collections: Arc<Vec<String>>,
    identity_collection: String,
}

impl RemoteStore {
    pub fn open(path: impl AsRef<Path>, config: &AppConfig) -> Result<Self, AppError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|error| {
                    AppError::internal(format!("cannot create database directory: {error}"))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self::from_connection(conn, config))
    }

    pub fn open_in_memory(config: &AppConfig) -> Result<Self, AppError> {
        Ok(Self::from_connection(Connection::open_in_memory()?, config))
    }

    fn from_connection(conn: Connection, config: &AppConfig) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            collections: Arc::new(config.collections.clone()),
            identity_collection: config.identity_collection.clone(),
        }
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Create every table. Safe to repeat.
    pub async fn init(&self) -> Result<InitReport, AppError> {
        let statements = self.ddl_statements();
        let mut conn = self.conn.lock().await;

        let batch = {
            let tx = conn.transaction()?;
            let applied = tx.execute_batch(&statements.join(";\n"));
            match applied {
                Ok(()) => tx.commit().map_err(AppError::from),
                Err(error) => Err(AppError::from(error)),
            }
        };
        if batch.is_ok() {
            return Ok(InitReport {
                success: true,
                message: format!("Initialized {} collection(s)", self.collections.len()),
                details: Vec::new(),
            });
        }

        tracing::warn!("Init batch failed; applying statements one by one");
        let mut details = Vec::with_capacity(statements.len());
        let mut failed = 0_usize;
        for statement in &statements {
            match conn.execute_batch(statement) {
                Ok(()) => details.push(InitStepReport {
                    success: true,
                    message: Some(statement_label(statement)),
                    error: None,
                }),
                Err(error) => {
                    let message = error.to_string();
                    if !is_tolerated_ddl_error(&message) {
                        failed += 1;
                    }
                    details.push(InitStepReport {
                        success: false,
                        message: Some(statement_label(statement)),
                        error: Some(message),
                    });
                }
            }
        }

        Ok(InitReport {
            success: failed == 0,
            message: if failed == 0 {
                "Schema already up to date".to_string()
            } else {
                format!("{failed} statement(s) failed")
            },
            details,
        })
    }

    /// Add one column to a collection table; an existing column is not an error.
    pub async fn migrate(
        &self,
        collection: &str,
        column: &str,
        column_type: &str,
    ) -> Result<ColumnChange, AppError> {
        let table = self.table(collection)?;
        if !is_sql_identifier(column) {
            return Err(AppError::bad_request(format!("invalid column name '{column}'")));
        }
        if !is_column_type(column_type) {
            return Err(AppError::bad_request(format!(
                "invalid column type '{column_type}'"
            )));
        }

        let conn = self.conn.lock().await;
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {column_type}");
        match conn.execute(&sql, []) {
            Ok(_) => {
                tracing::info!(collection, column, "Added column");
                Ok(ColumnChange::Added)
            }
            Err(error) if is_tolerated_ddl_error(&error.to_string()) => {
                Ok(ColumnChange::AlreadyPresent)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Upsert items on behalf of an authenticated caller. Returns how many rows were written.
    pub async fn push(
        &self,
        user: &AuthenticatedUser,
        collection: &str,
        items: &[Value],
        force: bool,
    ) -> Result<usize, AppError> {
        let table = self.table(collection)?;
        let incoming = items
            .iter()
            .map(parse_item)
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut processed = 0;
        for item in incoming {
            let existing = existing_row(&tx, &table, &item.id)?;
            if let Some((owner, stored_version)) = existing {
                if !user.is_admin() && owner.is_some() && owner != user.school_id {
                    return Err(AppError::Conflict { id: item.id });
                }
                if !force && stored_version > item.version {
                    tracing::debug!(collection, id = %item.id, "Kept newer stored row");
                    continue;
                }
            }

            let school_id = if user.is_admin() {
                item.school_id.clone().or_else(|| user.school_id.clone())
            } else {
                user.school_id.clone()
            };
            upsert_row(&tx, &table, &item, school_id.as_deref())?;
            processed += 1;
        }
        tx.commit()?;
        Ok(processed)
    }

    /// Unauthenticated push of a single, not yet known account record.
    pub async fn self_rescue(&self, collection: &str, items: &[Value]) -> Result<usize, AppError> {
        if collection != self.identity_collection {
            return Err(AppError::forbidden(
                "Self-rescue is only allowed for the identity collection",
            ));
        }
        let [item] = items else {
            return Err(AppError::forbidden(
                "Self-rescue must carry exactly one record",
            ));
        };
        let table = self.table(collection)?;
        let item = parse_item(item)?;

        let conn = self.conn.lock().await;
        if existing_row(&conn, &table, &item.id)?.is_some() {
            return Err(AppError::forbidden("Self-rescue cannot overwrite an existing account"));
        }
        upsert_row(&conn, &table, &item, item.school_id.as_deref())?;
        tracing::info!(collection, id = %item.id, "Accepted self-rescue account push");
        Ok(1)
    }

    /// Rows visible to the caller: admins see every row, others only their school's.
    pub async fn pull(&self, user: &AuthenticatedUser, collection: &str) -> Result<Vec<RowOut>, AppError> {
        let table = self.table(collection)?;
        let conn = self.conn.lock().await;

        let base = format!("SELECT id, data, updated_at, version FROM {table}");
        let mut stmt;
        let rows = if user.is_admin() {
            stmt = conn.prepare(&format!("{base} ORDER BY updated_at, id"))?;
            stmt.query_map([], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt = conn.prepare(&format!("{base} WHERE school_id = ?1 ORDER BY updated_at, id"))?;
            stmt.query_map([user.school_id.as_deref()], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        rows.into_iter()
            .map(|(id, data, updated_at, version)| -> Result<RowOut, AppError> {
                let data = match serde_json::from_str::<Value>(&data)? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                Ok(RowOut {
                    id,
                    data,
                    updated_at: updated_at.unwrap_or(0),
                    version: version.unwrap_or(1),
                })
            })
            .collect()
    }

    fn table(&self, collection: &str) -> Result<String, AppError> {
        if self.collections.iter().any(|name| name == collection) {
            Ok(format!("sync_{collection}"))
        } else {
            Err(AppError::bad_request(format!("unknown collection '{collection}'")))
        }
    }

    fn ddl_statements(&self) -> Vec<String> {
        self.collections
            .iter()
            .flat_map(|collection| {
                [
                    format!(
                        "CREATE TABLE IF NOT EXISTS sync_{collection} (
                            id TEXT PRIMARY KEY,
                            data TEXT NOT NULL,
                            school_id TEXT,
                            version INTEGER NOT NULL DEFAULT 1,
                            deleted INTEGER NOT NULL DEFAULT 0,
                            updated_at INTEGER
                        )"
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS idx_sync_{collection}_school ON sync_{collection}(school_id)"
                    ),
                ]
            })
            .collect()
    }
}

type StoredRow = (String, String, Option<i64>, Option<i64>);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn existing_row(
    conn: &Connection,
    table: &str,
    id: &str,
) -> Result<Option<(Option<String>, i64)>, AppError> {
    let row = conn
        .query_row(
            &format!("SELECT school_id, version FROM {table} WHERE id = ?1"),
            [id],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .optional()?;
    Ok(row.map(|(school, version)| (school, version.unwrap_or(1))))
}

fn upsert_row(
    conn: &Connection,
    table: &str,
    item: &IncomingItem,
    school_id: Option<&str>,
) -> Result<(), AppError> {
    conn.execute(
        &format!(
            "INSERT INTO {table} (id, data, school_id, version, deleted, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                school_id = excluded.school_id,
                version = excluded.version,
                deleted = excluded.deleted,
                updated_at = excluded.updated_at"
        ),
        params![
            item.id,
            item.data,
            school_id,
            item.version,
            item.deleted,
            chrono::Utc::now().timestamp_millis()
        ],
    )?;
    Ok(())
}

fn parse_item(value: &Value) -> Result<IncomingItem, AppError> {
    let Value::Object(object) = value else {
        return Err(AppError::bad_request("push items must be JSON objects"));
    };
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("push item is missing a string `id`"))?
        .to_string();
    let version = object.get("version").and_then(Value::as_i64).unwrap_or(1);
    let deleted = match object.get("deleted") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_i64().is_some_and(|n| n != 0),
        _ => false,
    };
    let school_id = object
        .get("school_id")
        .or_else(|| object.get("schoolId"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(IncomingItem {
        id,
        version,
        deleted,
        school_id,
        data: serde_json::to_string(object)?,
    })
}

fn is_tolerated_ddl_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    TOLERATED_DDL_ERRORS
        .iter()
        .any(|tolerated| message.contains(tolerated))
}

fn is_column_type(value: &str) -> bool {
    !value.trim().is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | '-' | '.'))
}

fn statement_label(statement: &str) -> String {
    statement
        .split_whitespace()
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn config() -> AppConfig {
        AppConfig::from_lookup(|key| match key {
            "SATCHEL_API_JWT_SECRET" => Some("test-secret-0123456789".to_string()),
            "SATCHEL_API_COLLECTIONS" => Some("users,students,scores".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn user(role: &str, school: Option<&str>) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: "u-1".to_string(),
            role: role.to_string(),
            school_id: school.map(ToString::to_string),
        }
    }

    async fn initialized() -> RemoteStore {
        let store = RemoteStore::open_in_memory(&config()).unwrap();
        assert!(store.init().await.unwrap().success);
        store
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = initialized().await;
        let again = store.init().await.unwrap();
        assert!(again.success);
        assert!(again.details.is_empty());
    }

    #[tokio::test]
    async fn push_then_pull_is_scoped_by_school() {
        let store = initialized().await;
        let teacher_a = user("teacher", Some("sch-a"));
        let teacher_b = user("teacher", Some("sch-b"));

        let processed = store
            .push(&teacher_a, "students", &[json!({"id": "s1", "version": 2, "full_name": "Ada"})], false)
            .await
            .unwrap();
        assert_eq!(processed, 1);

        let rows = store.pull(&teacher_a, "students").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 2);
        assert_eq!(rows[0].data.get("full_name"), Some(&json!("Ada")));

        assert!(store.pull(&teacher_b, "students").await.unwrap().is_empty());
        assert_eq!(store.pull(&user("admin", None), "students").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn push_of_foreign_id_is_a_conflict() {
        let store = initialized().await;
        store
            .push(&user("teacher", Some("sch-a")), "students", &[json!({"id": "s1"})], false)
            .await
            .unwrap();

        let error = store
            .push(&user("teacher", Some("sch-b")), "students", &[json!({"id": "s1", "version": 9})], true)
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Conflict { id } if id == "s1"));
    }

    #[tokio::test]
    async fn older_version_is_ignored_unless_forced() {
        let store = initialized().await;
        let teacher = user("teacher", Some("sch-a"));
        store
            .push(&teacher, "scores", &[json!({"id": "sc", "version": 5, "value": 90})], false)
            .await
            .unwrap();

        let stale = [json!({"id": "sc", "version": 3, "value": 10})];
        assert_eq!(store.push(&teacher, "scores", &stale, false).await.unwrap(), 0);
        assert_eq!(store.pull(&teacher, "scores").await.unwrap()[0].version, 5);

        assert_eq!(store.push(&teacher, "scores", &stale, true).await.unwrap(), 1);
        assert_eq!(store.pull(&teacher, "scores").await.unwrap()[0].version, 3);
    }

    #[tokio::test]
    async fn push_rejects_unknown_collection_and_missing_id() {
        let store = initialized().await;
        let admin = user("admin", None);
        assert!(matches!(
            store.push(&admin, "notes", &[json!({"id": "n"})], false).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            store.push(&admin, "students", &[json!({"name": "no id"})], false).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn legacy_table_reports_missing_column_until_migrated() {
        let store = RemoteStore::open_in_memory(&config()).unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute_batch(
                "CREATE TABLE sync_scores (id TEXT PRIMARY KEY, data TEXT NOT NULL, school_id TEXT)",
            )
            .unwrap();
        }
        assert!(store.init().await.unwrap().success);

        let teacher = user("teacher", Some("sch-a"));
        let error = store
            .push(&teacher, "scores", &[json!({"id": "sc", "version": 2})], false)
            .await
            .unwrap_err();
        assert!(error.to_string().to_ascii_lowercase().contains("no such column"));

        for (column, column_type) in [
            ("version", "INTEGER DEFAULT 1"),
            ("deleted", "INTEGER DEFAULT 0"),
            ("updated_at", "INTEGER"),
        ] {
            assert_eq!(
                store.migrate("scores", column, column_type).await.unwrap(),
                ColumnChange::Added
            );
        }
        assert_eq!(
            store.migrate("scores", "version", "INTEGER DEFAULT 1").await.unwrap(),
            ColumnChange::AlreadyPresent
        );
        assert_eq!(
            store.push(&teacher, "scores", &[json!({"id": "sc", "version": 2})], false).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn migrate_rejects_unsafe_input() {
        let store = initialized().await;
        assert!(store.migrate("scores", "x; DROP", "INTEGER").await.is_err());
        assert!(store.migrate("scores", "note", "TEXT; DROP TABLE x").await.is_err());
    }

    #[tokio::test]
    async fn self_rescue_accepts_only_a_new_single_account() {
        let store = initialized().await;
        let account = json!({"id": "u-new", "school_id": "sch-a", "full_name": "New Admin"});

        assert!(store.self_rescue("students", &[account.clone()]).await.is_err());
        assert!(store
            .self_rescue("users", &[account.clone(), json!({"id": "u-2"})])
            .await
            .is_err());
        assert_eq!(store.self_rescue("users", &[account.clone()]).await.unwrap(), 1);
        assert!(matches!(
            store.self_rescue("users", &[account]).await,
            Err(AppError::Forbidden(_))
        ));

        let rows = store.pull(&user("teacher", Some("sch-a")), "users").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "u-new");
    }
}
