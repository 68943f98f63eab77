//! Reference remote for the Satchel sync protocol.
//!
//! A single action-discriminated `POST /api/sync` endpoint over `SQLite`,
//! scoped by HS256 bearer tokens.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod store;

pub use config::AppConfig;
pub use error::AppError;
pub use routes::{app_router, AppState};
pub use store::RemoteStore;
