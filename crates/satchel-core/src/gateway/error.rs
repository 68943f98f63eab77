//! Gateway failure classification
//!
//! Every response the remote produces is classified exactly once, here.
//! Downstream code matches on [`GatewayError`] and never re-parses bodies.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::util::compact_text;

const SCHEMA_DRIFT_SIGNATURES: [&str; 3] =
    ["no such column", "has no column named", "missing column"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No network path; detected before any request is made
    #[error("Offline: the sync endpoint is not reachable from this device")]
    Offline,

    /// The request never got a response (DNS, reset, timeout)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// 401/403
    #[error("Unauthorized (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// 409 identity collision the local engine cannot resolve
    #[error("Identity conflict on '{}': {message}", .id.as_deref().unwrap_or("unknown"))]
    Conflict { id: Option<String>, message: String },

    /// HTTP error with a structured JSON body
    #[error("Remote error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP error with a non-JSON body, usually an HTML page from a proxy or platform
    #[error("Remote infrastructure failure (HTTP {status}): {diagnostic}")]
    Infrastructure { status: u16, diagnostic: String },

    /// Success status but a body that is not the JSON we expect
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Failures worth retrying for idempotent operations.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Infrastructure { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Api { status, .. } => matches!(status, 408 | 429 | 502..=504) && !self.is_schema_drift(),
            _ => false,
        }
    }

    /// The remote schema predates a column this client writes.
    pub fn is_schema_drift(&self) -> bool {
        let message = match self {
            Self::Api { message, .. } => message,
            Self::Infrastructure { diagnostic, .. } => diagnostic,
            _ => return false,
        };
        let message = message.to_ascii_lowercase();
        SCHEMA_DRIFT_SIGNATURES
            .iter()
            .any(|signature| message.contains(signature))
    }

    /// Short cause string for user-facing log lines.
    pub fn short_cause(&self) -> String {
        match self {
            Self::Offline => "offline".to_string(),
            Self::Transport(_) => "network failure".to_string(),
            Self::Unauthorized { .. } => "unauthorized".to_string(),
            Self::Conflict { id, .. } => {
                format!("identity conflict on {}", id.as_deref().unwrap_or("unknown"))
            }
            Self::Api { message, .. } => compact_text(message),
            Self::Infrastructure { status, diagnostic } => {
                format!("server unavailable ({status}: {diagnostic})")
            }
            Self::MalformedResponse(_) => "unexpected response".to_string(),
        }
    }
}

/// Classify a non-success HTTP response.
pub fn classify_failure(status: u16, body: &str) -> GatewayError {
    let json = serde_json::from_str::<Value>(body)
        .ok()
        .filter(Value::is_object);

    match status {
        401 | 403 => GatewayError::Unauthorized {
            status,
            message: json
                .as_ref()
                .and_then(error_message)
                .unwrap_or_else(|| fallback_message(status, body)),
        },
        409 => GatewayError::Conflict {
            id: json.as_ref().and_then(conflict_id),
            message: json
                .as_ref()
                .and_then(error_message)
                .unwrap_or_else(|| fallback_message(status, body)),
        },
        _ => match json {
            Some(json) => GatewayError::Api {
                status,
                message: error_message(&json).unwrap_or_else(|| compact_text(body)),
            },
            None => GatewayError::Infrastructure {
                status,
                diagnostic: html_diagnostic(status, body),
            },
        },
    }
}

fn error_message(json: &Value) -> Option<String> {
    json.get("error")
        .or_else(|| json.get("message"))
        .and_then(Value::as_str)
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
}

fn conflict_id(json: &Value) -> Option<String> {
    json.get("conflictId")
        .or_else(|| json.get("id"))
        .or_else(|| json.get("details").and_then(|details| details.get("id")))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn fallback_message(status: u16, body: &str) -> String {
    let compact = compact_text(body);
    if compact.is_empty() {
        format!("HTTP {status}")
    } else {
        compact
    }
}

fn html_diagnostic(status: u16, body: &str) -> String {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    static HEADING: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();

    let title = TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
    let heading = HEADING.get_or_init(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("valid regex"));
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

    let extracted = title
        .captures(body)
        .or_else(|| heading.captures(body))
        .and_then(|captures| captures.get(1))
        .map(|found| compact_text(&tag.replace_all(found.as_str(), " ")))
        .filter(|text| !text.is_empty());

    extracted.unwrap_or_else(|| fallback_message(status, &tag.replace_all(body, " ")))
}
