//! Sync lifecycle status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a record sits in its sync lifecycle.
///
/// `pending -> syncing -> synced | failed`, and `failed -> syncing` on retry.
/// `synced` is terminal. The reference id and the error message live inside
/// their variants, so a record carries a reference id exactly when it is
/// synced and an error exactly when it has failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "syncStatus", rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced {
        #[serde(rename = "serverReferenceId")]
        server_reference_id: String,
    },
    Failed {
        #[serde(rename = "syncError")]
        sync_error: String,
    },
}

impl SyncStatus {
    pub const fn kind(&self) -> SyncStatusKind {
        match self {
            Self::Pending => SyncStatusKind::Pending,
            Self::Syncing => SyncStatusKind::Syncing,
            Self::Synced { .. } => SyncStatusKind::Synced,
            Self::Failed { .. } => SyncStatusKind::Failed,
        }
    }

    /// Pending and failed records are eligible for a sync attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed { .. })
    }
}

/// Fieldless view of [`SyncStatus`] for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatusKind {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatusKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// Snapshot of record counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

impl RecordCounts {
    pub(crate) fn tally<'a>(statuses: impl IntoIterator<Item = &'a SyncStatus>) -> Self {
        statuses
            .into_iter()
            .fold(Self::default(), |mut counts, status| {
                match status.kind() {
                    SyncStatusKind::Pending => counts.pending += 1,
                    SyncStatusKind::Syncing => counts.syncing += 1,
                    SyncStatusKind::Synced => counts.synced += 1,
                    SyncStatusKind::Failed => counts.failed += 1,
                }
                counts
            })
    }

    pub const fn total(&self) -> usize {
        self.pending + self.syncing + self.synced + self.failed
    }

    /// Records still waiting on the remote service (pending + failed).
    pub const fn unsynced(&self) -> usize {
        self.pending + self.failed
    }
}
