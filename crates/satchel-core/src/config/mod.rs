//! Runtime configuration for the sync core.
//!
//! Everything is read from `SATCHEL_*` variables through a lookup function so
//! tests never touch the process environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::gateway::{ColumnRepair, RemoteCredentials};
use crate::models::CollectionRegistry;
use crate::util::{is_http_url, parse_flag};

/// Records per push request.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Collection holding user accounts; the only one eligible for self-rescue.
pub const DEFAULT_IDENTITY_COLLECTION: &str = "users";

/// Columns added by the lazy-migration path when the remote reports schema drift.
pub fn default_repair_columns() -> Vec<ColumnRepair> {
    vec![
        ColumnRepair::new("version", "INTEGER DEFAULT 1"),
        ColumnRepair::new("deleted", "INTEGER DEFAULT 0"),
        ColumnRepair::new("updated_at", "INTEGER"),
    ]
}

#[derive(Clone)]
pub struct SyncConfig {
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Id of the signed-in account inside the identity collection
    pub user_id: Option<String>,
    pub credentials: RemoteCredentials,
    pub batch_size: usize,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
    pub check_timeout: Duration,
    pub offline: bool,
    pub identity_collection: String,
    pub default_admin_credential: Option<String>,
    pub repair_columns: Vec<ColumnRepair>,
    pub registry: CollectionRegistry,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncConfig")
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .field("credentials", &self.credentials)
            .field("batch_size", &self.batch_size)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .field("request_timeout", &self.request_timeout)
            .field("check_timeout", &self.check_timeout)
            .field("offline", &self.offline)
            .field("identity_collection", &self.identity_collection)
            .field(
                "default_admin_credential",
                &self.default_admin_credential.as_ref().map(|_| "[REDACTED]"),
            )
            .field("repair_columns", &self.repair_columns)
            .field("collections", &self.registry.names().collect::<Vec<_>>())
            .finish()
    }
}

impl SyncConfig {
    /// Defaults for everything except the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_token: None,
            user_id: None,
            credentials: RemoteCredentials::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(1_000),
            request_timeout: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
            offline: false,
            identity_collection: DEFAULT_IDENTITY_COLLECTION.to_string(),
            default_admin_credential: None,
            repair_columns: default_repair_columns(),
            registry: CollectionRegistry::school_defaults(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = required_trimmed(&lookup, "SATCHEL_SYNC_ENDPOINT")?;
        if !is_http_url(&endpoint) {
            return Err(Error::Config(
                "SATCHEL_SYNC_ENDPOINT must start with http:// or https://".to_string(),
            ));
        }

        let batch_size = parse_in_range(&lookup, "SATCHEL_BATCH_SIZE", "50", 1..=500)?;
        let retry_attempts = parse_in_range(&lookup, "SATCHEL_RETRY_ATTEMPTS", "3", 1..=10)?;
        let retry_backoff_ms =
            parse_in_range(&lookup, "SATCHEL_RETRY_BACKOFF_MS", "1000", 0..=60_000)?;
        let request_timeout_secs =
            parse_in_range(&lookup, "SATCHEL_REQUEST_TIMEOUT_SECS", "30", 1..=600)?;
        let check_timeout_secs =
            parse_in_range(&lookup, "SATCHEL_CHECK_TIMEOUT_SECS", "5", 1..=60)?;

        let registry = match optional_trimmed(&lookup, "SATCHEL_SCHEMA_PATH") {
            Some(path) => load_registry(PathBuf::from(path))?,
            None => CollectionRegistry::school_defaults(),
        };

        let identity_collection = value_or_default(
            &lookup,
            "SATCHEL_IDENTITY_COLLECTION",
            DEFAULT_IDENTITY_COLLECTION,
        );
        if registry.get(&identity_collection).is_none() {
            tracing::warn!(
                collection = %identity_collection,
                "Identity collection is not registered; self-rescue will never trigger"
            );
        }

        Ok(Self {
            endpoint,
            access_token: optional_trimmed(&lookup, "SATCHEL_ACCESS_TOKEN"),
            user_id: optional_trimmed(&lookup, "SATCHEL_USER_ID"),
            credentials: RemoteCredentials {
                db_url: optional_trimmed(&lookup, "SATCHEL_DB_URL"),
                db_token: optional_trimmed(&lookup, "SATCHEL_DB_TOKEN"),
            },
            batch_size,
            retry_attempts,
            retry_backoff: Duration::from_millis(retry_backoff_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
            check_timeout: Duration::from_secs(check_timeout_secs),
            offline: optional_trimmed(&lookup, "SATCHEL_OFFLINE").is_some_and(|v| parse_flag(&v)),
            identity_collection,
            default_admin_credential: optional_trimmed(&lookup, "SATCHEL_DEFAULT_ADMIN_CREDENTIAL"),
            repair_columns: default_repair_columns(),
            registry,
        })
    }

    /// Credential override to send with `check`/`init`, if any was configured.
    pub fn credential_override(&self) -> Option<&RemoteCredentials> {
        (!self.credentials.is_empty()).then_some(&self.credentials)
    }
}

fn load_registry(path: PathBuf) -> Result<CollectionRegistry> {
    let payload = std::fs::read_to_string(&path).map_err(|error| {
        Error::Config(format!(
            "failed to read SATCHEL_SCHEMA_PATH '{}': {error}",
            path.display()
        ))
    })?;
    CollectionRegistry::from_json(&payload)
}

fn parse_in_range<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: std::ops::RangeInclusive<T>,
) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + fmt::Display,
{
    let invalid = || {
        Error::Config(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = value_or_default(lookup, name, default)
        .parse::<T>()
        .map_err(|_| invalid())?;
    if !range.contains(&value) {
        return Err(invalid());
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    optional_trimmed(lookup, name)
        .ok_or_else(|| Error::Config(format!("Missing required environment variable: {name}")))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
