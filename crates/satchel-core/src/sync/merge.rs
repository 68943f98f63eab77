//! Version-based reconciliation of a pulled row set with the local collection

use std::collections::HashMap;

use crate::models::{CollectionSchema, RemoteRow, SyncConflict, SyncRecord};

/// What a merge decided for one remote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Not present locally; appended
    Added,
    /// Remote version was newer; local record replaced whole
    Replaced,
    /// Local version is equal or newer; remote ignored
    KeptLocal,
}

/// Result of reconciling one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Full merged collection, local order first, new remote rows appended
    pub records: Vec<SyncRecord>,
    /// Whether any record was added or replaced
    pub changed: bool,
    /// Only the records that were added or replaced, in merge order
    pub applied: Vec<SyncRecord>,
    /// Dirty local edits lost to a newer remote version
    pub conflicts: Vec<SyncConflict>,
    pub added: usize,
    pub replaced: usize,
    pub kept: usize,
}

/// Decide per record whether the remote row wins.
///
/// The remote wins only with a strictly greater version; a missing local
/// version counts as 1. A winning row replaces the local record entirely and
/// comes back marked synced at the remote's version.
pub fn merge_collection(
    schema: &CollectionSchema,
    local: Vec<SyncRecord>,
    remote: Vec<RemoteRow>,
) -> MergeOutcome {
    let mut merged = local;
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(position, record)| (record.id.clone(), position))
        .collect();

    let mut outcome = MergeOutcome::default();
    let mut touched = Vec::new();

    for row in remote {
        let candidate = row.into_record(schema);
        let decision = match index.get(&candidate.id).copied() {
            None => {
                index.insert(candidate.id.clone(), merged.len());
                touched.push(merged.len());
                merged.push(candidate);
                MergeDecision::Added
            }
            Some(position) => {
                let current = &merged[position];
                if candidate.version > current.version {
                    if current.is_dirty() {
                        outcome.conflicts.push(SyncConflict::version_lww(
                            &schema.name,
                            &current.id,
                            current.version,
                            candidate.version,
                        ));
                    }
                    if !touched.contains(&position) {
                        touched.push(position);
                    }
                    merged[position] = candidate;
                    MergeDecision::Replaced
                } else {
                    MergeDecision::KeptLocal
                }
            }
        };

        match decision {
            MergeDecision::Added => outcome.added += 1,
            MergeDecision::Replaced => outcome.replaced += 1,
            MergeDecision::KeptLocal => outcome.kept += 1,
        }
    }

    outcome.changed = !touched.is_empty();
    outcome.applied = touched
        .into_iter()
        .map(|position| merged[position].clone())
        .collect();
    outcome.records = merged;
    outcome
}
