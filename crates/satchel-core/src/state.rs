//! Coarse sync state shared by every front end.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the orchestrator is in its `Idle -> Syncing -> Idle | Error` cycle.
///
/// `Error` is sticky until the next run starts, which begins from it exactly
/// as from `Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        })
    }
}
