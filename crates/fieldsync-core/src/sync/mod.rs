//! Sync engine: submits cached records and tracks their outcome.

mod client;
mod engine;
mod keyed_lock;

pub use client::{HttpSubmitClient, SubmitClient, SubmitError, SubmitReceipt, SubmitResult};
pub use engine::{BulkSyncReport, SyncEngine, SyncOutcome};
pub use keyed_lock::{KeyGuard, KeyedLock};
