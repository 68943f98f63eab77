pub mod common;
pub mod delete;
pub mod list;
pub mod put;
pub mod remote;
pub mod status;
pub mod sync;
pub mod watch;
