//! Wire format of the single action-discriminated sync endpoint

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::RemoteRow;

/// Optional remote database credential override for `check` and `init`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCredentials {
    #[serde(rename = "dbUrl", skip_serializing_if = "Option::is_none")]
    pub db_url: Option<String>,
    #[serde(rename = "dbToken", skip_serializing_if = "Option::is_none")]
    pub db_token: Option<String>,
}

impl RemoteCredentials {
    pub const fn is_empty(&self) -> bool {
        self.db_url.is_none() && self.db_token.is_none()
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteCredentials")
            .field("db_url", &self.db_url)
            .field("db_token", &self.db_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Column added by the lazy-migration repair path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRepair {
    pub column: String,
    #[serde(rename = "columnType")]
    pub column_type: String,
}

impl ColumnRepair {
    pub fn new(column: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            column_type: column_type.into(),
        }
    }
}

/// Request body, discriminated by `action`.
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub(crate) enum SyncAction<'a> {
    Check {
        #[serde(flatten)]
        credentials: Option<&'a RemoteCredentials>,
    },
    Init {
        #[serde(flatten)]
        credentials: Option<&'a RemoteCredentials>,
    },
    Push {
        collection: &'a str,
        items: &'a [Value],
        force: bool,
        #[serde(rename = "selfRescue", skip_serializing_if = "std::ops::Not::not")]
        self_rescue: bool,
    },
    Pull {
        collection: &'a str,
    },
    Migrate {
        collection: &'a str,
        #[serde(flatten)]
        repair: &'a ColumnRepair,
    },
}

/// One statement outcome reported by `init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitStep {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of the idempotent schema bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<InitStep>,
}

/// Acknowledgement of one pushed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushAck {
    pub processed: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PushResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub processed: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PullResponse {
    #[serde(default)]
    pub rows: Option<Vec<RemoteRow>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn push_request_shape() {
        let items = vec![json!({"id": "s1", "version": 2})];
        let body = serde_json::to_value(SyncAction::Push {
            collection: "students",
            items: &items,
            force: false,
            self_rescue: false,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "action": "push",
                "collection": "students",
                "items": [{"id": "s1", "version": 2}],
                "force": false
            })
        );
    }

    #[test]
    fn check_request_flattens_credential_override() {
        let credentials = RemoteCredentials {
            db_url: Some("file:alt.db".to_string()),
            db_token: Some("secret".to_string()),
        };
        let body = serde_json::to_value(SyncAction::Check {
            credentials: Some(&credentials),
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"action": "check", "dbUrl": "file:alt.db", "dbToken": "secret"})
        );

        let bare = serde_json::to_value(SyncAction::Init { credentials: None }).unwrap();
        assert_eq!(bare, json!({"action": "init"}));
    }

    #[test]
    fn migrate_request_shape() {
        let repair = ColumnRepair::new("deleted", "INTEGER DEFAULT 0");
        let body = serde_json::to_value(SyncAction::Migrate {
            collection: "scores",
            repair: &repair,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "action": "migrate",
                "collection": "scores",
                "column": "deleted",
                "columnType": "INTEGER DEFAULT 0"
            })
        );
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let credentials = RemoteCredentials {
            db_url: Some("libsql://school.example".to_string()),
            db_token: Some("secret".to_string()),
        };
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
