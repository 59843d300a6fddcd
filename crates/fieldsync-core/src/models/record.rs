//! Cached report record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::payload::ReportPayload;
use super::status::{SyncStatus, SyncStatusKind};

/// A unique identifier for a cached record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One user-submitted report awaiting or having completed transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecord {
    /// Unique identifier, stable for the record's lifetime
    pub id: RecordId,
    /// Domain fields, passed through unchanged to the remote service
    pub payload: ReportPayload,
    /// Creation timestamp (Unix ms), never mutated
    pub created_at: i64,
    /// Timestamp of the last status transition (Unix ms)
    #[serde(default)]
    pub updated_at: i64,
    /// Number of submit attempts made so far
    #[serde(default)]
    pub attempts: u32,
    /// Sync lifecycle state
    #[serde(flatten)]
    pub status: SyncStatus,
}

impl CachedRecord {
    /// Create a new pending record stamped at `now` (Unix ms)
    #[must_use]
    pub fn new(payload: ReportPayload, now: i64) -> Self {
        Self {
            id: RecordId::new(),
            payload,
            created_at: now,
            updated_at: now,
            attempts: 0,
            status: SyncStatus::Pending,
        }
    }

    pub const fn kind(&self) -> SyncStatusKind {
        self.status.kind()
    }

    pub const fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }

    /// Remote acknowledgment id, present only once synced
    pub fn server_reference_id(&self) -> Option<&str> {
        match &self.status {
            SyncStatus::Synced {
                server_reference_id,
            } => Some(server_reference_id),
            _ => None,
        }
    }

    /// Last failure message, present only while failed
    pub fn sync_error(&self) -> Option<&str> {
        match &self.status {
            SyncStatus::Failed { sync_error } => Some(sync_error),
            _ => None,
        }
    }

    /// Apply a status transition, stamping `updated_at`.
    pub(crate) fn transition(&mut self, status: SyncStatus, now: i64) {
        tracing::debug!(
            "Record {} transition {} -> {}",
            self.id,
            self.status.kind(),
            status.kind()
        );
        self.status = status;
        self.updated_at = now;
    }
}
