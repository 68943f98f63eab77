//! Data models for Satchel

mod record;
mod remote_row;
mod schema;
mod sync_conflict;

pub use record::{SyncRecord, META_FIELDS};
pub use remote_row::RemoteRow;
pub use schema::{CollectionRegistry, CollectionSchema, FieldMapping, FieldTransform};
pub use sync_conflict::SyncConflict;
