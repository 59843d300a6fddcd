//! Shared cross-platform state types.

use serde::Serialize;

use crate::models::RecordCounts;

/// Unified sync state shown by clients in their status banner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    /// Derive the banner state from connectivity, bulk activity and counts.
    pub const fn from_parts(online: bool, bulk_running: bool, counts: &RecordCounts) -> Self {
        if !online {
            Self::Offline
        } else if bulk_running || counts.syncing > 0 {
            Self::Syncing
        } else if counts.failed > 0 {
            Self::Error
        } else {
            Self::Synced
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "Offline: reports are cached locally",
            Self::Syncing => "Syncing cached reports...",
            Self::Synced => "All reports synced",
            Self::Error => "Some reports failed to sync; will retry",
        }
    }
}
