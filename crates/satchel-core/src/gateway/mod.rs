//! Remote sync gateway
//!
//! Turns sync intents (`check`, `init`, `push`, `pull`, plus the `migrate`
//! repair call) into requests against the remote store and hands back either
//! a typed payload or a classified [`GatewayError`].

mod error;
mod http;
mod wire;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::RemoteRow;

pub use error::{classify_failure, GatewayError};
pub use http::{HttpGateway, RetryPolicy};
pub use wire::{ColumnRepair, InitOutcome, InitStep, PushAck, RemoteCredentials};

/// Operations the sync core needs from the remote store.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Whether the device is known to be offline. No request is attempted while true.
    fn is_offline(&self) -> bool;

    /// Advisory reachability probe. Never fails; any problem reads as `false`.
    async fn check(&self, credentials: Option<&RemoteCredentials>) -> bool;

    /// Idempotent schema bootstrap.
    async fn init(&self, credentials: Option<&RemoteCredentials>)
        -> Result<InitOutcome, GatewayError>;

    /// Send one bounded batch of wire-shaped records.
    async fn push(
        &self,
        collection: &str,
        items: &[Value],
        force: bool,
    ) -> Result<PushAck, GatewayError>;

    /// Push the caller's own identity record without credentials.
    async fn push_self_rescue(&self, collection: &str, item: Value)
        -> Result<PushAck, GatewayError>;

    /// All rows of a collection visible to the caller's scope.
    async fn pull(&self, collection: &str) -> Result<Vec<RemoteRow>, GatewayError>;

    /// Idempotently add a column the remote schema is missing.
    async fn add_column(&self, collection: &str, repair: &ColumnRepair)
        -> Result<(), GatewayError>;
}

pub(crate) fn is_tolerated_init_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already exists")
        || message.contains("duplicate column")
        || message.contains("fell back to sequential")
}

impl InitOutcome {
    /// Treat "already exists", "duplicate column" and sequential-fallback
    /// reports as success: the bootstrap is idempotent by construction.
    #[must_use]
    pub fn tolerating_idempotent_failures(mut self) -> Self {
        if self.success {
            return self;
        }
        let steps_tolerated = self.details.iter().all(|step| {
            step.success
                || step
                    .error
                    .as_deref()
                    .or(step.message.as_deref())
                    .is_some_and(is_tolerated_init_message)
        });
        let message_tolerated = self.message.is_empty() || is_tolerated_init_message(&self.message);
        if steps_tolerated && message_tolerated && !(self.details.is_empty() && self.message.is_empty()) {
            self.success = true;
        }
        self
    }
}
