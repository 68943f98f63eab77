//! Sync engine: batching pusher, merge engine and the orchestrator driving them.

mod events;
mod lock;
mod merge;
mod orchestrator;
mod pusher;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{EventBus, LogLevel, SyncEvent, SyncStatus};
pub use lock::{SyncLock, SyncLockGuard};
pub use merge::{merge_collection, MergeDecision, MergeOutcome};
pub use orchestrator::{
    CollectionFailure, CollectionReport, PullReport, SyncMode, SyncOrchestrator, SyncReport,
};
pub use pusher::{BatchPusher, PrePushHook, PrivilegedAccountGuard, PushContext, PushReport};
pub use scheduler::{SchedulerError, SyncScheduler};
