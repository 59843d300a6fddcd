//! fieldsync-core - Core library for fieldsync
//!
//! Offline-first cache and sync engine for field reports. Reports are saved
//! locally first, then delivered to a remote submit endpoint when the device
//! is online, with automatic retry once connectivity returns.

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

#[cfg(test)]
mod testing;

pub use config::SyncSettings;
pub use connectivity::{SubmitOutcome, SyncCoordinator};
pub use error::{Error, Result};
pub use models::{CachedRecord, RecordCounts, RecordId, ReportPayload, SyncStatus, SyncStatusKind};
pub use services::RecordManager;
pub use state::SyncState;
pub use sync::{BulkSyncReport, SyncEngine, SyncOutcome};
