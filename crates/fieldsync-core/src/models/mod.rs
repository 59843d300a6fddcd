//! Data models for fieldsync

mod payload;
mod record;
mod status;

pub use payload::ReportPayload;
pub use record::{CachedRecord, RecordId};
pub use status::{RecordCounts, SyncStatus, SyncStatusKind};
