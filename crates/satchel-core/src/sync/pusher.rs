//! Batching pusher
//!
//! Sends a collection's dirty records to the remote in bounded batches, one
//! request at a time. Each acknowledged batch is marked synced before the next
//! one goes out, so a failure part way through keeps the earlier progress.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{SyncConfig, DEFAULT_BATCH_SIZE};
use crate::error::Result;
use crate::gateway::{ColumnRepair, GatewayError, PushAck, RemoteGateway};
use crate::models::{CollectionSchema, SyncRecord};
use crate::store::LocalStore;

/// What one collection push did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub collection: String,
    /// Records selected for sending (dirty ones unless forced)
    pub selected: usize,
    /// Requests that were acknowledged
    pub batches: usize,
    /// Records acknowledged by the remote
    pub pushed: usize,
    /// Remote-reported processed count, summed over batches
    pub processed: usize,
    /// Whether the lazy-migration repair ran
    pub repaired: bool,
    /// Whether the caller's own account went through self-rescue
    pub rescued: bool,
}

/// What a pre-push hook may look at.
pub struct PushContext<'a> {
    pub collection: &'a str,
    pub schema: &'a CollectionSchema,
    pub gateway: &'a dyn RemoteGateway,
}

/// Record rewrite applied to a collection's changeset before batching.
#[async_trait]
pub trait PrePushHook: Send + Sync {
    async fn before_push(&self, context: &PushContext<'_>, records: &mut [SyncRecord]) -> Result<()>;
}

/// Keeps privileged accounts from being pushed with an empty credential.
///
/// An empty credential is replaced by the one the remote already holds for
/// the same id; failing that, by a configured default; failing that, by a
/// generated one.
#[derive(Clone)]
pub struct PrivilegedAccountGuard {
    collection: String,
    role_field: String,
    privileged_role: String,
    credential_field: String,
    default_credential: Option<String>,
}

impl PrivilegedAccountGuard {
    pub fn new(collection: impl Into<String>, default_credential: Option<String>) -> Self {
        Self {
            collection: collection.into(),
            role_field: "role".to_string(),
            privileged_role: "admin".to_string(),
            credential_field: "password".to_string(),
            default_credential,
        }
    }

    fn needs_credential(&self, record: &SyncRecord) -> bool {
        record.field_str(&self.role_field) == Some(self.privileged_role.as_str())
            && record
                .field_str(&self.credential_field)
                .is_none_or(|value| value.trim().is_empty())
    }

    async fn remote_credentials(
        &self,
        context: &PushContext<'_>,
    ) -> HashMap<String, String> {
        let rows = match context.gateway.pull(context.collection).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(
                    collection = context.collection,
                    "Could not read existing credentials before push: {}",
                    error
                );
                return HashMap::new();
            }
        };

        rows.into_iter()
            .filter_map(|row| {
                let record = row.into_record(context.schema);
                let credential = record
                    .field_str(&self.credential_field)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())?
                    .to_string();
                Some((record.id, credential))
            })
            .collect()
    }
}

impl std::fmt::Debug for PrivilegedAccountGuard {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PrivilegedAccountGuard")
            .field("collection", &self.collection)
            .field("privileged_role", &self.privileged_role)
            .field(
                "default_credential",
                &self.default_credential.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PrePushHook for PrivilegedAccountGuard {
    async fn before_push(&self, context: &PushContext<'_>, records: &mut [SyncRecord]) -> Result<()> {
        if context.collection != self.collection
            || !records.iter().any(|record| self.needs_credential(record))
        {
            return Ok(());
        }

        let existing = self.remote_credentials(context).await;
        for record in records.iter_mut().filter(|record| self.needs_credential(record)) {
            let credential = if let Some(credential) = existing.get(&record.id) {
                tracing::info!(id = %record.id, "Restored privileged credential from remote");
                credential.clone()
            } else if let Some(default) = &self.default_credential {
                tracing::warn!(id = %record.id, "Privileged account had no credential; applied configured default");
                default.clone()
            } else {
                tracing::warn!(id = %record.id, "Privileged account had no credential; generated one, reset required");
                Uuid::now_v7().simple().to_string()
            };
            record
                .fields
                .insert(self.credential_field.clone(), Value::String(credential));
        }
        Ok(())
    }
}

/// Pushes one collection at a time.
#[derive(Clone)]
pub struct BatchPusher {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<dyn LocalStore>,
    batch_size: usize,
    repair_columns: Vec<ColumnRepair>,
    identity_collection: String,
    user_id: Option<String>,
    hooks: Vec<Arc<dyn PrePushHook>>,
}

impl BatchPusher {
    pub fn new(gateway: Arc<dyn RemoteGateway>, store: Arc<dyn LocalStore>, config: &SyncConfig) -> Self {
        Self {
            gateway,
            store,
            batch_size: config.batch_size,
            repair_columns: config.repair_columns.clone(),
            identity_collection: config.identity_collection.clone(),
            user_id: config.user_id.clone(),
            hooks: vec![Arc::new(PrivilegedAccountGuard::new(
                config.identity_collection.clone(),
                config.default_admin_credential.clone(),
            ))],
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PrePushHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn without_hooks(mut self) -> Self {
        self.hooks.clear();
        self
    }

    pub fn batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }

    /// Push a collection's changeset. `force` sends every record, dirty or not.
    ///
    /// Errors abort the remaining batches; already acknowledged batches stay
    /// marked synced.
    pub async fn push_collection(&self, schema: &CollectionSchema, force: bool) -> Result<PushReport> {
        let collection = schema.name.as_str();
        let mut records = if force {
            self.store.get_all(collection).await?
        } else {
            self.store.get_dirty(collection).await?
        };

        let mut report = PushReport {
            collection: collection.to_string(),
            selected: records.len(),
            ..PushReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let context = PushContext {
            collection,
            schema,
            gateway: self.gateway.as_ref(),
        };
        for hook in &self.hooks {
            hook.before_push(&context, &mut records).await?;
        }

        let total_batches = records.len().div_ceil(self.batch_size());
        for (index, batch) in records.chunks(self.batch_size()).enumerate() {
            let items = batch
                .iter()
                .map(|record| wire_item(schema, record))
                .collect::<Vec<_>>();
            tracing::debug!(collection, batch = index + 1, total_batches, size = batch.len(), "Pushing batch");

            match self.send_batch(collection, &items, force, &mut report).await {
                Ok(ack) => {
                    self.mark_synced(collection, batch).await?;
                    report.batches += 1;
                    report.pushed += batch.len();
                    report.processed += ack.processed;
                }
                Err(error) if error.is_unauthorized() && collection == self.identity_collection => {
                    if let Some(own) = self.self_rescue(schema, batch).await {
                        self.mark_synced(collection, std::slice::from_ref(own)).await?;
                        report.rescued = true;
                        report.pushed += 1;
                        if batch.len() == 1 {
                            report.batches += 1;
                            continue;
                        }
                    }
                    return Err(error.into());
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(report)
    }

    /// One request, plus at most one repair-and-retry per collection push.
    async fn send_batch(
        &self,
        collection: &str,
        items: &[Value],
        force: bool,
        report: &mut PushReport,
    ) -> std::result::Result<PushAck, GatewayError> {
        match self.gateway.push(collection, items, force).await {
            Err(error) if error.is_schema_drift() && !report.repaired => {
                report.repaired = true;
                tracing::warn!(collection, "Remote schema is missing a column, repairing: {}", error);
                self.repair_schema(collection).await?;
                self.gateway.push(collection, items, force).await
            }
            outcome => outcome,
        }
    }

    async fn repair_schema(&self, collection: &str) -> std::result::Result<(), GatewayError> {
        for repair in &self.repair_columns {
            self.gateway.add_column(collection, repair).await?;
            tracing::debug!(collection, column = %repair.column, "Column repair applied");
        }
        Ok(())
    }

    /// Push the caller's own account without auth. Returns it when accepted.
    async fn self_rescue<'b>(
        &self,
        schema: &CollectionSchema,
        batch: &'b [SyncRecord],
    ) -> Option<&'b SyncRecord> {
        let user_id = self.user_id.as_deref()?;
        let own = batch.iter().find(|record| record.id == user_id)?;

        tracing::warn!(collection = %schema.name, id = %own.id, "Unauthorized; attempting self-rescue push");
        match self
            .gateway
            .push_self_rescue(&schema.name, wire_item(schema, own))
            .await
        {
            Ok(_) => Some(own),
            Err(error) => {
                tracing::warn!(collection = %schema.name, "Self-rescue rejected: {}", error);
                None
            }
        }
    }

    /// Mark pushed records synced unless they changed locally meanwhile.
    async fn mark_synced(&self, collection: &str, pushed: &[SyncRecord]) -> Result<()> {
        let ids: Vec<String> = pushed.iter().map(|record| record.id.clone()).collect();
        let current: HashMap<String, SyncRecord> = self
            .store
            .get_many(collection, &ids)
            .await?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let acknowledged: Vec<SyncRecord> = pushed
            .iter()
            .filter(|record| {
                current
                    .get(&record.id)
                    .is_some_and(|stored| stored.version == record.version)
            })
            .map(|record| {
                let mut record = record.clone();
                record.is_synced = true;
                record
            })
            .collect();

        let skipped = pushed.len() - acknowledged.len();
        if skipped > 0 {
            tracing::debug!(collection, skipped, "Records changed during push stay dirty");
        }
        self.store.upsert_many(collection, &acknowledged).await
    }
}

/// Flat wire object: sync metadata plus the payload in remote field names.
pub(crate) fn wire_item(schema: &CollectionSchema, record: &SyncRecord) -> Value {
    let mut item = schema.to_remote(record.fields.clone());
    item.insert("id".to_string(), Value::from(record.id.clone()));
    item.insert("version".to_string(), Value::from(record.version));
    item.insert("lastModified".to_string(), Value::from(record.last_modified));
    item.insert("deleted".to_string(), Value::from(record.deleted));
    Value::Object(item)
}
