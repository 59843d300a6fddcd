//! Connectivity monitoring and the auto-sync coordinator.

mod coordinator;
mod probe;

pub use coordinator::{
    ConnectivityCheck, MonitorHandle, SubmitOutcome, SyncCoordinator, DEFAULT_POLL_INTERVAL,
};
pub use probe::{ConnectivityProbe, HttpConnectivityProbe, StaticProbe};
