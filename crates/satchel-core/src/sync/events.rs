//! Lifecycle event stream published by the orchestrator

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::orchestrator::SyncMode;

/// Final status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Best-effort notifications for whoever displays sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// Emitted once at the end of every run that acquired the lock
    SyncStatus { status: SyncStatus },
    /// The dirty count may have changed
    UnsavedChanges,
    /// One human-readable line for a diagnostic console
    Log { level: LogLevel, message: String },
    /// Collection `index` of `total` is being processed
    Progress {
        mode: SyncMode,
        collection: String,
        index: usize,
        total: usize,
    },
}

/// Broadcast bus; sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Emit a log line and mirror it to `tracing`.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.emit(SyncEvent::Log { level, message });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.log(LogLevel::Info, "pushing students");
        bus.emit(SyncEvent::SyncStatus {
            status: SyncStatus::Success,
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::Log {
                level: LogLevel::Info,
                message: "pushing students".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::SyncStatus {
                status: SyncStatus::Success
            }
        );
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        EventBus::new(4).emit(SyncEvent::UnsavedChanges);
    }

    #[test]
    fn events_serialize_with_kebab_case_tag() {
        let value = serde_json::to_value(SyncEvent::SyncStatus {
            status: SyncStatus::Error,
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "sync-status", "status": "error"})
        );
    }
}
