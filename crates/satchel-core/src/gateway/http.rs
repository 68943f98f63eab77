//! HTTP implementation of the remote gateway

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;

use super::error::{classify_failure, GatewayError};
use super::wire::{
    ColumnRepair, InitOutcome, PullResponse, PushAck, PushResponse, RemoteCredentials, SyncAction,
};
use super::{is_tolerated_init_message, RemoteGateway};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::RemoteRow;
use crate::util::compact_text;

/// Bounded retry for idempotent calls (`check`, `init`, `pull`, `migrate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(1_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Bearer,
    Anonymous,
}

/// Gateway speaking the JSON-over-POST sync protocol.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    endpoint: String,
    access_token: Arc<RwLock<Option<String>>>,
    offline: Arc<AtomicBool>,
    retry: RetryPolicy,
    request_timeout: Duration,
    check_timeout: Duration,
}

impl HttpGateway {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            access_token: Arc::new(RwLock::new(config.access_token.clone())),
            offline: Arc::new(AtomicBool::new(config.offline)),
            retry: RetryPolicy {
                attempts: config.retry_attempts,
                backoff: config.retry_backoff,
            },
            request_timeout: config.request_timeout,
            check_timeout: config.check_timeout,
        })
    }

    /// Set the bearer identity token attached to scoped requests.
    pub async fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().await = Some(token.into());
    }

    /// Forget the identity token (logout).
    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
    }

    /// Flip the offline flag, e.g. from a connectivity watcher.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(
        &self,
        action: &SyncAction<'_>,
        auth: Auth,
        timeout: Duration,
    ) -> std::result::Result<Value, GatewayError> {
        if self.is_offline() {
            return Err(GatewayError::Offline);
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .json(action);
        if auth == Auth::Bearer {
            if let Some(token) = self.access_token.read().await.as_deref() {
                request = request.bearer_auth(token);
            }
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }

        serde_json::from_str::<Value>(&body).map_err(|_| {
            GatewayError::MalformedResponse(format!(
                "expected a JSON body, got: {}",
                non_empty_or(&compact_text(&body), "<empty>")
            ))
        })
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut attempt_once: F,
    ) -> std::result::Result<T, GatewayError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, GatewayError>> + Send,
        T: Send,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match attempt_once().await {
                Err(error) if error.is_transient() && attempt < attempts => {
                    let delay = self.retry.backoff * attempt;
                    tracing::warn!(
                        operation,
                        attempt,
                        "Transient gateway failure, retrying in {:?}: {}",
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn push_with(
        &self,
        collection: &str,
        items: &[Value],
        force: bool,
        self_rescue: bool,
    ) -> std::result::Result<PushAck, GatewayError> {
        let action = SyncAction::Push {
            collection,
            items,
            force,
            self_rescue,
        };
        let auth = if self_rescue {
            Auth::Anonymous
        } else {
            Auth::Bearer
        };
        let body = self.post(&action, auth, self.request_timeout).await?;

        let Ok(response) = serde_json::from_value::<PushResponse>(body) else {
            tracing::warn!(collection, "Push response had an unexpected shape; assuming zero processed");
            return Ok(PushAck::default());
        };
        if response.success == Some(false) {
            return Err(GatewayError::Api {
                status: 200,
                message: response
                    .error
                    .unwrap_or_else(|| "push reported success=false".to_string()),
            });
        }
        Ok(PushAck {
            processed: response.processed.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    async fn check(&self, credentials: Option<&RemoteCredentials>) -> bool {
        if self.is_offline() {
            return false;
        }

        // Retries and backoff share one deadline so the check stays short.
        let action = SyncAction::Check { credentials };
        let outcome = tokio::time::timeout(
            self.check_timeout,
            self.with_retry("check", || {
                self.post(&action, Auth::Anonymous, self.check_timeout)
            }),
        )
        .await;

        match outcome {
            Ok(Ok(body)) => body.get("success").and_then(Value::as_bool).unwrap_or(false),
            Ok(Err(error)) => {
                tracing::debug!("Connectivity check failed: {}", error);
                false
            }
            Err(_) => {
                tracing::debug!("Connectivity check timed out after {:?}", self.check_timeout);
                false
            }
        }
    }

    async fn init(
        &self,
        credentials: Option<&RemoteCredentials>,
    ) -> std::result::Result<InitOutcome, GatewayError> {
        let action = SyncAction::Init { credentials };
        let outcome = self
            .with_retry("init", || {
                self.post(&action, Auth::Anonymous, self.request_timeout)
            })
            .await;

        match outcome {
            Ok(body) => {
                let parsed = serde_json::from_value::<InitOutcome>(body).unwrap_or_else(|_| {
                    tracing::warn!("Init response had an unexpected shape");
                    InitOutcome::default()
                });
                Ok(parsed.tolerating_idempotent_failures())
            }
            Err(GatewayError::Api { message, .. }) if is_tolerated_init_message(&message) => {
                Ok(InitOutcome {
                    success: true,
                    message,
                    details: Vec::new(),
                })
            }
            Err(error) => Err(error),
        }
    }

    async fn push(
        &self,
        collection: &str,
        items: &[Value],
        force: bool,
    ) -> std::result::Result<PushAck, GatewayError> {
        self.push_with(collection, items, force, false).await
    }

    async fn push_self_rescue(
        &self,
        collection: &str,
        item: Value,
    ) -> std::result::Result<PushAck, GatewayError> {
        self.push_with(collection, std::slice::from_ref(&item), true, true)
            .await
    }

    async fn pull(&self, collection: &str) -> std::result::Result<Vec<RemoteRow>, GatewayError> {
        let action = SyncAction::Pull { collection };
        let body = self
            .with_retry("pull", || {
                self.post(&action, Auth::Bearer, self.request_timeout)
            })
            .await?;

        let response = serde_json::from_value::<PullResponse>(body).map_err(|error| {
            GatewayError::MalformedResponse(format!("pull rows for '{collection}': {error}"))
        })?;
        Ok(response.rows.unwrap_or_else(|| {
            tracing::warn!(collection, "Pull response had no rows field; treating as empty");
            Vec::new()
        }))
    }

    async fn add_column(
        &self,
        collection: &str,
        repair: &ColumnRepair,
    ) -> std::result::Result<(), GatewayError> {
        let action = SyncAction::Migrate { collection, repair };
        let outcome = self
            .with_retry("migrate", || {
                self.post(&action, Auth::Bearer, self.request_timeout)
            })
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(GatewayError::Api { message, .. }) if is_tolerated_init_message(&message) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

fn transport_error(error: reqwest::Error) -> GatewayError {
    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    GatewayError::Transport(format!(
        "{kind}: {}",
        error.to_string().replace('\n', " ").trim()
    ))
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}
