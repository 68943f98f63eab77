use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::{ColumnChange, RemoteStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    verifier: Arc<JwtVerifier>,
    store: RemoteStore,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let store = RemoteStore::open(&config.database_path, &config)?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Arc<AppConfig>, store: RemoteStore) -> Self {
        Self {
            verifier: Arc::new(JwtVerifier::new(&config)),
            store,
            config,
        }
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AppError> {
        let token = extract_bearer_token(headers)?;
        self.verifier.verify_access_token(token)
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/sync", post(sync_action))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

/// Request body of the sync endpoint, discriminated by `action`.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum SyncRequest {
    Check {
        #[serde(rename = "dbUrl")]
        db_url: Option<String>,
    },
    Init {
        #[serde(rename = "dbUrl")]
        db_url: Option<String>,
    },
    Push {
        collection: String,
        items: Vec<Value>,
        #[serde(default)]
        force: bool,
        #[serde(default, rename = "selfRescue")]
        self_rescue: bool,
    },
    Pull {
        collection: String,
    },
    Migrate {
        collection: String,
        column: String,
        #[serde(rename = "columnType")]
        column_type: String,
    },
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn sync_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(body) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let request: SyncRequest = serde_json::from_value(body)
        .map_err(|error| AppError::bad_request(format!("malformed sync request: {error}")))?;

    match request {
        SyncRequest::Check { db_url } => {
            ignore_override(db_url.as_deref());
            state.store.ping().await?;
            Ok(Json(json!({ "success": true })))
        }
        SyncRequest::Init { db_url } => {
            ignore_override(db_url.as_deref());
            let report = state.store.init().await?;
            tracing::info!(success = report.success, "Schema bootstrap: {}", report.message);
            Ok(Json(serde_json::to_value(report)?))
        }
        SyncRequest::Push {
            collection,
            items,
            self_rescue: true,
            ..
        } => {
            let processed = state.store.self_rescue(&collection, &items).await?;
            Ok(Json(json!({ "success": true, "processed": processed })))
        }
        SyncRequest::Push {
            collection,
            items,
            force,
            ..
        } => {
            let user = state.authenticate(&headers)?;
            let processed = state.store.push(&user, &collection, &items, force).await?;
            tracing::info!(
                collection = %collection,
                user = %user.user_id,
                received = items.len(),
                processed,
                force,
                "Push applied"
            );
            Ok(Json(json!({ "success": true, "processed": processed })))
        }
        SyncRequest::Pull { collection } => {
            let user = state.authenticate(&headers)?;
            let rows = state.store.pull(&user, &collection).await?;
            tracing::debug!(collection = %collection, rows = rows.len(), "Pull served");
            Ok(Json(json!({ "rows": rows })))
        }
        SyncRequest::Migrate {
            collection,
            column,
            column_type,
        } => {
            state.authenticate(&headers)?;
            let message = match state.store.migrate(&collection, &column, &column_type).await? {
                ColumnChange::Added => format!("added column {column}"),
                ColumnChange::AlreadyPresent => format!("column {column} already exists"),
            };
            Ok(Json(json!({ "success": true, "message": message })))
        }
    }
}

// This remote serves a single database; per-request overrides are accepted and ignored.
fn ignore_override(db_url: Option<&str>) {
    if db_url.is_some() {
        tracing::debug!("Ignoring database override in sync request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_action() {
        let push: SyncRequest = serde_json::from_value(json!({
            "action": "push",
            "collection": "users",
            "items": [{"id": "u"}],
            "force": false,
            "selfRescue": true
        }))
        .unwrap();
        assert!(matches!(push, SyncRequest::Push { self_rescue: true, .. }));

        let migrate: SyncRequest = serde_json::from_value(json!({
            "action": "migrate",
            "collection": "scores",
            "column": "deleted",
            "columnType": "INTEGER DEFAULT 0"
        }))
        .unwrap();
        assert!(matches!(migrate, SyncRequest::Migrate { .. }));

        let check: SyncRequest =
            serde_json::from_value(json!({"action": "check", "dbToken": "t"})).unwrap();
        assert!(matches!(check, SyncRequest::Check { db_url: None }));
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(serde_json::from_value::<SyncRequest>(json!({"action": "drop"})).is_err());
    }
}
