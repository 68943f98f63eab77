use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Collections served when `SATCHEL_API_COLLECTIONS` is unset.
pub const DEFAULT_COLLECTIONS: [&str; 10] = [
    "users",
    "schools",
    "classes",
    "students",
    "subjects",
    "scores",
    "attendance",
    "journals",
    "schedules",
    "settings",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    pub collections: Vec<String>,
    pub identity_collection: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("collections", &self.collections)
            .field("identity_collection", &self.identity_collection)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SATCHEL_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = PathBuf::from(value_or_default(
            &lookup,
            "SATCHEL_API_DATABASE_PATH",
            "satchel-remote.db",
        ));

        let jwt_secret = required_trimmed(&lookup, "SATCHEL_API_JWT_SECRET")?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "SATCHEL_API_JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }
        let jwt_issuer = optional_trimmed(&lookup, "SATCHEL_API_JWT_ISSUER");

        let auth_clock_skew_secs = value_or_default(&lookup, "SATCHEL_API_AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "SATCHEL_API_AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string(),
                )
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "SATCHEL_API_AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let collections = optional_trimmed(&lookup, "SATCHEL_API_COLLECTIONS").map_or_else(
            || DEFAULT_COLLECTIONS.iter().map(ToString::to_string).collect(),
            |value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            },
        );
        if collections.is_empty() {
            return Err(ConfigError::Invalid(
                "SATCHEL_API_COLLECTIONS must name at least one collection".to_string(),
            ));
        }
        if let Some(bad) = collections.iter().find(|name| !is_sql_identifier(name)) {
            return Err(ConfigError::Invalid(format!(
                "SATCHEL_API_COLLECTIONS entry '{bad}' must be lowercase letters, digits or '_'"
            )));
        }

        let identity_collection =
            value_or_default(&lookup, "SATCHEL_API_IDENTITY_COLLECTION", "users");
        if !collections.contains(&identity_collection) {
            return Err(ConfigError::Invalid(format!(
                "SATCHEL_API_IDENTITY_COLLECTION '{identity_collection}' is not a served collection"
            )));
        }

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            collections,
            identity_collection,
        })
    }
}

/// Names interpolated into SQL must be plain lowercase identifiers.
pub fn is_sql_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
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

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let err = config_from(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("SATCHEL_API_JWT_SECRET"));
    }

    #[test]
    fn config_defaults_to_school_collections() {
        let map = HashMap::from([("SATCHEL_API_JWT_SECRET", "0123456789abcdef-secret")]);
        let config = config_from(&map).unwrap();
        assert_eq!(config.collections.len(), 10);
        assert_eq!(config.identity_collection, "users");
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn config_rejects_unsafe_collection_names() {
        let map = HashMap::from([
            ("SATCHEL_API_JWT_SECRET", "0123456789abcdef-secret"),
            ("SATCHEL_API_COLLECTIONS", "users, students; DROP TABLE x"),
        ]);
        assert!(matches!(config_from(&map), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_requires_identity_collection_to_be_served() {
        let map = HashMap::from([
            ("SATCHEL_API_JWT_SECRET", "0123456789abcdef-secret"),
            ("SATCHEL_API_COLLECTIONS", "students,scores"),
        ]);
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("users"));
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let map = HashMap::from([("SATCHEL_API_JWT_SECRET", "sensitive-signing-secret")]);
        let config = config_from(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-signing-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn sql_identifier_rules() {
        assert!(is_sql_identifier("attendance"));
        assert!(is_sql_identifier("_v2_rows"));
        assert!(!is_sql_identifier("2rows"));
        assert!(!is_sql_identifier("Users"));
        assert!(!is_sql_identifier(""));
    }
}
