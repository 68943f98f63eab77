use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use satchel_core::SyncMode;

#[derive(Parser)]
#[command(name = "satchel")]
#[command(about = "Offline-first record sync for school management clients")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local replica database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Treat the device as offline; no network request is made
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync local replica with the remote store
    Sync {
        /// Which direction(s) to run
        #[arg(long, value_enum, default_value_t = ModeArg::Full)]
        mode: ModeArg,
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Probe whether the remote is reachable
    Check,
    /// Bootstrap the remote schema (safe to repeat)
    Init,
    /// Show unsynced record counts per collection
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records of a collection
    List {
        collection: String,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include soft-deleted records
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create or update records from a JSON object or array (stdin when omitted)
    Put {
        collection: String,
        /// JSON payload
        json: Option<String>,
    },
    /// Soft-delete records
    Delete {
        collection: String,
        /// Record ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Run a full sync on a fixed interval until interrupted
    Watch {
        /// Seconds between runs
        #[arg(long, default_value = "300")]
        interval_secs: u64,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push every record of a collection, synced or not
    ForcePush { collection: String },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Full,
    Push,
    Pull,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => Self::Full,
            ModeArg::Push => Self::Push,
            ModeArg::Pull => Self::Pull,
        }
    }
}
