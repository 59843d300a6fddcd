use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use fieldsync_core::SyncStatusKind;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Cache field reports offline and sync them when a connection is available")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the sync settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Treat the device as offline: cache only, never contact the server
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cache a new report and submit it when online
    #[command(alias = "new")]
    Add {
        /// Report fields as key=value pairs
        fields: Vec<String>,
        /// Report payload as a JSON object
        #[arg(long, value_name = "JSON", conflicts_with = "fields")]
        json: Option<String>,
    },
    /// List cached reports, newest first
    List {
        /// Only show reports with this status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show counts by status and the current sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync one report, or every pending and failed report
    Sync {
        /// Report ID or unique ID prefix
        id: Option<String>,
    },
    /// Retry only failed reports
    Retry,
    /// Delete a cached report
    Delete {
        /// Report ID or unique ID prefix
        id: String,
    },
    /// Remove reports that are already synced
    ClearSynced,
    /// Poll connectivity and auto-sync until interrupted
    Watch,
    /// Show or edit sync settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl From<StatusFilter> for SyncStatusKind {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Pending => Self::Pending,
            StatusFilter::Syncing => Self::Syncing,
            StatusFilter::Synced => Self::Synced,
            StatusFilter::Failed => Self::Failed,
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings (token redacted)
    Show,
    /// Create or update the settings file
    Init {
        /// Endpoint that accepts submitted reports
        #[arg(long, value_name = "URL")]
        submit_endpoint: Option<String>,
        /// Bearer token for the submit endpoint
        #[arg(long, value_name = "TOKEN")]
        api_token: Option<String>,
        /// URL probed to detect connectivity
        #[arg(long, value_name = "URL")]
        connectivity_url: Option<String>,
        /// Seconds between connectivity checks
        #[arg(long, value_name = "SECS")]
        poll_interval_secs: Option<u64>,
        /// Seconds before a submit request times out
        #[arg(long, value_name = "SECS")]
        request_timeout_secs: Option<u64>,
        /// Storage key for the cached collection
        #[arg(long, value_name = "KEY")]
        storage_key: Option<String>,
    },
}
