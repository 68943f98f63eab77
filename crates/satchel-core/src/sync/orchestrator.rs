//! Sync orchestrator
//!
//! Walks the registered collections in order, pushing and/or pulling each
//! one, under a non-queueing reentrancy lock. A failure in one collection is
//! logged and the run moves on, except `Unauthorized`, which ends the run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use super::events::{EventBus, LogLevel, SyncEvent, SyncStatus};
use super::lock::SyncLock;
use super::merge::merge_collection;
use super::pusher::{BatchPusher, PushReport};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::gateway::{GatewayError, InitOutcome, RemoteCredentials, RemoteGateway};
use crate::models::{CollectionRegistry, CollectionSchema, SyncConflict, SyncRecord};
use crate::state::SyncPhase;
use crate::store::LocalStore;
use crate::util::unix_millis_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Push,
    Pull,
    /// Push then pull, per collection
    Full,
}

impl SyncMode {
    const fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::Full)
    }

    const fn pulls(self) -> bool {
        matches!(self, Self::Pull | Self::Full)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Full => "full",
        };
        f.write_str(label)
    }
}

/// Pull-side result for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub fetched: usize,
    pub added: usize,
    pub replaced: usize,
    pub kept: usize,
    /// Merge writes skipped because the record changed locally mid-sync
    pub skipped: usize,
    pub conflicts: usize,
}

impl PullReport {
    pub const fn changed(&self) -> bool {
        self.added + self.replaced > self.skipped
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub collection: String,
    pub push: Option<PushReport>,
    pub pull: Option<PullReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFailure {
    pub collection: String,
    pub cause: String,
    /// The classified remote failure, when the gateway produced one
    pub error: Option<GatewayError>,
}

impl CollectionFailure {
    /// Id the remote refused with a 409, so the caller can overwrite, skip or rename.
    pub fn conflict_id(&self) -> Option<&str> {
        match &self.error {
            Some(GatewayError::Conflict { id, .. }) => id.as_deref(),
            _ => None,
        }
    }
}

/// Aggregate outcome of one run that acquired the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub started_at: i64,
    pub finished_at: i64,
    pub collections: Vec<CollectionReport>,
    pub failures: Vec<CollectionFailure>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections
            .iter()
            .find(|report| report.collection == name)
    }
}

pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    registry: CollectionRegistry,
    credentials: Option<RemoteCredentials>,
    pusher: BatchPusher,
    lock: SyncLock,
    events: EventBus,
    phase: RwLock<SyncPhase>,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn LocalStore>, gateway: Arc<dyn RemoteGateway>, config: &SyncConfig) -> Self {
        let pusher = BatchPusher::new(Arc::clone(&gateway), Arc::clone(&store), config);
        Self {
            store,
            gateway,
            registry: config.registry.clone(),
            credentials: config.credential_override().cloned(),
            pusher,
            lock: SyncLock::new(),
            events: EventBus::default(),
            phase: RwLock::new(SyncPhase::Idle),
        }
    }

    /// Replace the pusher, e.g. to add pre-push hooks.
    #[must_use]
    pub fn with_pusher(mut self, pusher: BatchPusher) -> Self {
        self.pusher = pusher;
        self
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> SyncPhase {
        *self.phase.read().await
    }

    pub fn is_syncing(&self) -> bool {
        self.lock.is_held()
    }

    /// Free a lock left behind by a run that never finished.
    pub async fn reset_lock(&self) -> bool {
        let was_held = self.lock.force_reset();
        if was_held {
            *self.phase.write().await = SyncPhase::Idle;
            self.events
                .log(LogLevel::Warn, "Sync lock was force-reset; an abandoned run may still finish");
        }
        was_held
    }

    /// Advisory reachability probe.
    pub async fn check(&self) -> bool {
        let connected = self.gateway.check(self.credentials.as_ref()).await;
        self.events.log(
            LogLevel::Info,
            if connected {
                "Remote is reachable"
            } else {
                "Remote is not reachable"
            },
        );
        connected
    }

    /// Idempotent remote schema bootstrap.
    pub async fn init(&self) -> Result<InitOutcome> {
        match self.gateway.init(self.credentials.as_ref()).await {
            Ok(outcome) => {
                let level = if outcome.success {
                    LogLevel::Info
                } else {
                    LogLevel::Warn
                };
                self.events
                    .log(level, format!("Remote init: {}", display_or(&outcome.message, "done")));
                Ok(outcome)
            }
            Err(error) => {
                self.events
                    .log(LogLevel::Error, format!("Remote init failed: {}", error.short_cause()));
                Err(error.into())
            }
        }
    }

    /// Run one sync over every registered collection.
    ///
    /// Returns `AlreadySyncing` without any network call if a run is in
    /// flight. Per-collection failures are reported in the [`SyncReport`];
    /// `Unauthorized` aborts the run and is returned as an error.
    pub async fn sync(&self, mode: SyncMode) -> Result<SyncReport> {
        if self.gateway.is_offline() {
            self.events.log(LogLevel::Warn, "Offline; sync skipped");
            return Err(GatewayError::Offline.into());
        }

        let Some(guard) = self.lock.try_acquire() else {
            self.events
                .log(LogLevel::Warn, "A sync is already in progress; request rejected");
            return Err(Error::AlreadySyncing);
        };

        *self.phase.write().await = SyncPhase::Syncing;
        self.events.log(
            LogLevel::Info,
            format!("Starting {mode} sync of {} collections", self.registry.len()),
        );

        let outcome = self.run(mode).await;

        let status = match &outcome {
            Ok(report) if report.is_success() => {
                self.events.log(LogLevel::Info, format!("{mode} sync finished"));
                SyncStatus::Success
            }
            Ok(report) => {
                let failed: Vec<&str> = report
                    .failures
                    .iter()
                    .map(|failure| failure.collection.as_str())
                    .collect();
                self.events.log(
                    LogLevel::Error,
                    format!("{mode} sync finished with failures in: {}", failed.join(", ")),
                );
                SyncStatus::Error
            }
            Err(error) => {
                self.events
                    .log(LogLevel::Error, format!("{mode} sync aborted: {error}"));
                SyncStatus::Error
            }
        };

        *self.phase.write().await = match status {
            SyncStatus::Success => SyncPhase::Idle,
            SyncStatus::Error => SyncPhase::Error,
        };
        self.events.emit(SyncEvent::SyncStatus { status });
        self.events.emit(SyncEvent::UnsavedChanges);
        guard.release();

        outcome
    }

    /// Push every record of one collection regardless of its synced flag.
    pub async fn force_push(&self, collection: &str) -> Result<PushReport> {
        let schema = self.schema(collection)?.clone();
        if self.gateway.is_offline() {
            return Err(GatewayError::Offline.into());
        }
        let Some(guard) = self.lock.try_acquire() else {
            return Err(Error::AlreadySyncing);
        };

        self.events
            .log(LogLevel::Warn, format!("Force-pushing every record of {collection}"));
        let outcome = self.pusher.push_collection(&schema, true).await;
        if let Err(error) = &outcome {
            self.events.log(
                LogLevel::Error,
                format!("Force push of {collection} failed: {}", short_cause(error)),
            );
        }
        self.events.emit(SyncEvent::UnsavedChanges);
        guard.release();
        outcome
    }

    async fn run(&self, mode: SyncMode) -> Result<SyncReport> {
        let mut report = SyncReport {
            mode,
            started_at: unix_millis_now(),
            finished_at: 0,
            collections: Vec::with_capacity(self.registry.len()),
            failures: Vec::new(),
        };

        let total = self.registry.len();
        for (index, schema) in self.registry.collections.iter().enumerate() {
            self.events.emit(SyncEvent::Progress {
                mode,
                collection: schema.name.clone(),
                index,
                total,
            });

            match self.sync_collection(mode, schema).await {
                Ok(collection_report) => report.collections.push(collection_report),
                Err(error) if error.is_unauthorized() => {
                    self.events.log(
                        LogLevel::Error,
                        format!("{}: unauthorized, remaining collections skipped", schema.name),
                    );
                    return Err(match error {
                        Error::Gateway(source) => Error::Collection {
                            collection: schema.name.clone(),
                            source,
                        },
                        other => other,
                    });
                }
                Err(error) => {
                    let cause = short_cause(&error);
                    self.events
                        .log(LogLevel::Error, format!("{} failed: {cause}", schema.name));
                    report.failures.push(CollectionFailure {
                        collection: schema.name.clone(),
                        cause,
                        error: error.gateway().cloned(),
                    });
                }
            }
        }

        report.finished_at = unix_millis_now();
        Ok(report)
    }

    async fn sync_collection(&self, mode: SyncMode, schema: &CollectionSchema) -> Result<CollectionReport> {
        let mut report = CollectionReport {
            collection: schema.name.clone(),
            ..CollectionReport::default()
        };

        if mode.pushes() {
            let pushed = self.pusher.push_collection(schema, false).await?;
            if pushed.selected > 0 {
                self.events.log(
                    LogLevel::Info,
                    format!(
                        "{}: pushed {} of {} in {} batch(es){}",
                        schema.name,
                        pushed.pushed,
                        pushed.selected,
                        pushed.batches,
                        if pushed.repaired { " after schema repair" } else { "" }
                    ),
                );
            }
            report.push = Some(pushed);
        }

        if mode.pulls() {
            let pulled = self.pull_collection(schema).await?;
            if pulled.changed() {
                self.events.log(
                    LogLevel::Info,
                    format!(
                        "{}: merged {} new, {} updated",
                        schema.name, pulled.added, pulled.replaced
                    ),
                );
            }
            report.pull = Some(pulled);
        }

        Ok(report)
    }

    async fn pull_collection(&self, schema: &CollectionSchema) -> Result<PullReport> {
        let collection = schema.name.as_str();
        let rows = self.gateway.pull(collection).await?;
        let local = self.store.get_all(collection).await?;
        let known: HashMap<String, i64> = local
            .iter()
            .map(|record| (record.id.clone(), record.version))
            .collect();

        let fetched = rows.len();
        let outcome = merge_collection(schema, local, rows);
        let mut report = PullReport {
            fetched,
            added: outcome.added,
            replaced: outcome.replaced,
            kept: outcome.kept,
            ..PullReport::default()
        };
        if !outcome.changed {
            return Ok(report);
        }

        // User edits may have landed since the snapshot; only write over
        // records still at the version the merge saw.
        let ids: Vec<String> = outcome.applied.iter().map(|record| record.id.clone()).collect();
        let current: HashMap<String, SyncRecord> = self
            .store
            .get_many(collection, &ids)
            .await?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let writes: Vec<SyncRecord> = outcome
            .applied
            .into_iter()
            .filter(|candidate| {
                match (known.get(&candidate.id), current.get(&candidate.id)) {
                    (Some(seen), Some(now)) => now.version == *seen,
                    (None, None) => true,
                    (None, Some(now)) => candidate.version > now.version,
                    (Some(_), None) => false,
                }
            })
            .collect();
        report.skipped = ids.len() - writes.len();

        let conflicts: Vec<SyncConflict> = outcome
            .conflicts
            .into_iter()
            .filter(|conflict| writes.iter().any(|record| record.id == conflict.record_id))
            .collect();
        for conflict in &conflicts {
            tracing::warn!(
                collection,
                id = %conflict.record_id,
                local_version = conflict.local_version,
                remote_version = conflict.remote_version,
                "Unsynced local edit replaced by newer remote version"
            );
        }
        report.conflicts = conflicts.len();

        self.store.upsert_many(collection, &writes).await?;
        self.store.record_conflicts(&conflicts).await?;
        if report.skipped > 0 {
            tracing::debug!(collection, skipped = report.skipped, "Merge writes skipped for records edited mid-sync");
        }
        Ok(report)
    }

    /// Write records as local mutations: version bumped, marked dirty.
    pub async fn save_local(&self, collection: &str, records: Vec<SyncRecord>) -> Result<Vec<SyncRecord>> {
        self.schema(collection)?;
        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        let existing: HashMap<String, i64> = self
            .store
            .get_many(collection, &ids)
            .await?
            .into_iter()
            .map(|record| (record.id, record.version))
            .collect();

        let saved: Vec<SyncRecord> = records
            .into_iter()
            .map(|mut record| {
                match existing.get(&record.id) {
                    Some(stored) => {
                        record.version = record.version.max(*stored);
                        record.touch();
                    }
                    None => {
                        record.version = record.version.max(1);
                        record.last_modified = unix_millis_now();
                        record.is_synced = false;
                    }
                }
                record
            })
            .collect();

        self.store.upsert_many(collection, &saved).await?;
        self.events.emit(SyncEvent::UnsavedChanges);
        Ok(saved)
    }

    /// Soft-delete records so the deletion syncs like any other edit.
    pub async fn delete_local(&self, collection: &str, ids: &[String]) -> Result<usize> {
        self.schema(collection)?;
        let mut records = self.store.get_many(collection, ids).await?;
        for record in &mut records {
            record.mark_deleted();
        }
        self.store.upsert_many(collection, &records).await?;
        self.events.emit(SyncEvent::UnsavedChanges);
        Ok(records.len())
    }

    /// Dirty record count per registered collection, in sync order.
    pub async fn dirty_counts(&self) -> Result<Vec<(String, usize)>> {
        let mut counts = Vec::with_capacity(self.registry.len());
        for name in self.registry.names() {
            counts.push((name.to_string(), self.store.count_dirty(name).await?));
        }
        Ok(counts)
    }

    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.store.list_conflicts(limit).await
    }

    fn schema(&self, collection: &str) -> Result<&CollectionSchema> {
        self.registry
            .get(collection)
            .ok_or_else(|| Error::InvalidInput(format!("unknown collection '{collection}'")))
    }
}

fn short_cause(error: &Error) -> String {
    error
        .gateway()
        .map_or_else(|| error.to_string(), GatewayError::short_cause)
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}
