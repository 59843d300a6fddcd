//! Polls connectivity, triggers auto-sync when the device comes back online
//! and gates the record-creation flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::probe::ConnectivityProbe;
use crate::error::Result;
use crate::models::{RecordId, ReportPayload};
use crate::state::SyncState;
use crate::sync::{BulkSyncReport, SyncEngine, SyncOutcome};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const CACHED_OFFLINE_MESSAGE: &str = "Saved offline; it will sync when a connection is available";
const CACHED_LATER_MESSAGE: &str = "Saved locally; it will sync later";

/// What a single connectivity check observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityCheck {
    pub online: bool,
    /// The previous check saw the device offline (or there was none).
    pub transitioned: bool,
    /// Set when the transition triggered an automatic bulk sync.
    pub report: Option<BulkSyncReport>,
}

/// Result of the cache-first submit flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub record_id: RecordId,
    pub success: bool,
    /// The record is stored locally and still waits for a sync.
    pub cached: bool,
    pub message: String,
}

pub struct SyncCoordinator {
    engine: Arc<SyncEngine>,
    probe: Arc<dyn ConnectivityProbe>,
    poll_interval: Duration,
    online: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(engine: Arc<SyncEngine>, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            engine,
            probe,
            poll_interval: DEFAULT_POLL_INTERVAL,
            online: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        if poll_interval.is_zero() {
            tracing::warn!("Ignoring zero poll interval");
        } else {
            self.poll_interval = poll_interval;
        }
        self
    }

    pub const fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Online state seen by the last check. `false` before the first one.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Probe once and run the auto-sync if this check brought the device
    /// online and there is anything to sync.
    pub async fn check_connectivity(&self) -> ConnectivityCheck {
        let online = self.probe.is_online().await;
        let was_online = self.online.swap(online, Ordering::AcqRel);
        let transitioned = online && !was_online;

        if online != was_online {
            tracing::info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }

        let report = if transitioned {
            self.auto_sync().await
        } else {
            None
        };

        ConnectivityCheck {
            online,
            transitioned,
            report,
        }
    }

    async fn auto_sync(&self) -> Option<BulkSyncReport> {
        let unsynced = self.engine.records().counts().await.unsynced();
        if unsynced == 0 {
            return None;
        }

        tracing::info!("Back online with {unsynced} unsynced record(s); starting auto-sync");
        Some(self.engine.sync_all_pending().await)
    }

    /// Manual bulk sync of every pending and failed record.
    pub async fn sync_now(&self) -> BulkSyncReport {
        self.engine.sync_all_pending().await
    }

    /// Cache the payload, then try to deliver it right away when online.
    ///
    /// Only a failed cache write is an error; a failed delivery leaves the
    /// record `failed` for the next bulk sync.
    pub async fn submit(&self, payload: ReportPayload) -> Result<SubmitOutcome> {
        let record = self.engine.records().add_record(payload).await?;
        let record_id = record.id;

        if !self.probe.is_online().await {
            tracing::debug!("Offline; record {record_id} cached for later");
            return Ok(SubmitOutcome {
                record_id,
                success: true,
                cached: true,
                message: CACHED_OFFLINE_MESSAGE.to_string(),
            });
        }

        let outcome = match self.engine.sync_record(&record_id).await? {
            SyncOutcome::Synced { reference_id } | SyncOutcome::AlreadySynced { reference_id } => {
                SubmitOutcome {
                    record_id,
                    success: true,
                    cached: false,
                    message: format!("Report submitted (reference {reference_id})"),
                }
            }
            SyncOutcome::Failed { message } => SubmitOutcome {
                record_id,
                success: false,
                cached: true,
                message: format!("Saved locally; submit failed and will be retried: {message}"),
            },
            SyncOutcome::NotFound | SyncOutcome::InFlight => SubmitOutcome {
                record_id,
                success: true,
                cached: true,
                message: CACHED_LATER_MESSAGE.to_string(),
            },
        };
        Ok(outcome)
    }

    /// Summary for a status banner.
    pub async fn sync_state(&self) -> SyncState {
        let counts = self.engine.records().counts().await;
        SyncState::from_parts(
            self.is_online(),
            self.engine.is_bulk_sync_in_progress(),
            &counts,
        )
    }

    /// Spawn the polling loop: one check right away, then one per interval.
    ///
    /// Dropping the returned handle stops the loop as well.
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let coordinator = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coordinator.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(
                "Connectivity monitor started (every {:?})",
                coordinator.poll_interval
            );

            loop {
                tokio::select! {
                    biased;
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        coordinator.check_connectivity().await;
                    }
                }
            }

            tracing::debug!("Connectivity monitor stopped");
        });

        MonitorHandle { shutdown, task }
    }
}

/// Handle to a running connectivity monitor.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Ask the loop to exit. A check already in progress, including its
    /// auto-sync, finishes first.
    pub fn stop(&self) {
        // Err only means the loop already exited.
        let _ = self.shutdown.send(true);
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        let Self { shutdown, task } = self;
        if let Err(error) = task.await {
            tracing::warn!("Connectivity monitor ended abnormally: {error}");
        }
        drop(shutdown);
    }

    pub async fn shutdown(self) {
        self.stop();
        self.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatusKind;
    use crate::services::RecordManager;
    use crate::store::{MemoryKeyValueStore, RecordStore};
    use crate::testing::{payload, FailingKeyValueStore, FakeProbe, FakeSubmitClient};
    use pretty_assertions::assert_eq;

    struct Harness {
        coordinator: Arc<SyncCoordinator>,
        client: Arc<FakeSubmitClient>,
        probe: Arc<FakeProbe>,
    }

    async fn harness(client: FakeSubmitClient, online: bool) -> Harness {
        let records = RecordManager::open(RecordStore::new(Arc::new(MemoryKeyValueStore::new())))
            .await;
        let client = Arc::new(client);
        let probe = Arc::new(FakeProbe::new(online));
        let engine = Arc::new(SyncEngine::new(Arc::new(records), client.clone()));
        let coordinator = Arc::new(SyncCoordinator::new(engine, probe.clone()));
        Harness {
            coordinator,
            client,
            probe,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_submit_caches_without_network() {
        let h = harness(FakeSubmitClient::succeeding(), false).await;

        let outcome = h.coordinator.submit(payload("M1")).await.unwrap();

        assert!(outcome.success);
        assert!(outcome.cached);
        assert_eq!(outcome.message, CACHED_OFFLINE_MESSAGE);
        let records = h.coordinator.engine().records();
        assert_eq!(records.counts().await.total(), 1);
        assert_eq!(
            records.get(&outcome.record_id).await.unwrap().kind(),
            SyncStatusKind::Pending
        );
        assert_eq!(h.client.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_submit_syncs_immediately() {
        let h = harness(FakeSubmitClient::succeeding().with_reference("REF-42"), true).await;

        let outcome = h.coordinator.submit(payload("M1")).await.unwrap();

        assert!(outcome.success);
        assert!(!outcome.cached);
        assert!(outcome.message.contains("REF-42"));
        let record = h
            .coordinator
            .engine()
            .records()
            .get(&outcome.record_id)
            .await
            .unwrap();
        assert_eq!(record.kind(), SyncStatusKind::Synced);
        assert_eq!(record.server_reference_id(), Some("REF-42"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_submit_failure_keeps_record_cached() {
        let h = harness(FakeSubmitClient::failing("HTTP 500"), true).await;

        let outcome = h.coordinator.submit(payload("M1")).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.cached);
        assert!(outcome.message.contains("HTTP 500"));
        let record = h
            .coordinator
            .engine()
            .records()
            .get(&outcome.record_id)
            .await
            .unwrap();
        assert_eq!(record.kind(), SyncStatusKind::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_propagates_cache_write_failure() {
        let kv = Arc::new(FailingKeyValueStore::new());
        let records = Arc::new(RecordManager::open(RecordStore::new(kv.clone())).await);
        let client = Arc::new(FakeSubmitClient::succeeding());
        let engine = Arc::new(SyncEngine::new(records, client.clone()));
        let coordinator = SyncCoordinator::new(engine, Arc::new(FakeProbe::new(true)));

        kv.fail_writes(true);
        assert!(coordinator.submit(payload("M1")).await.is_err());
        assert_eq!(client.calls(), 0);
        // Kept in memory for the running session.
        assert_eq!(coordinator.engine().records().pending_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn coming_online_triggers_one_auto_sync() {
        let h = harness(FakeSubmitClient::succeeding(), false).await;
        h.coordinator.submit(payload("M1")).await.unwrap();
        h.coordinator.submit(payload("M2")).await.unwrap();

        let offline = h.coordinator.check_connectivity().await;
        assert_eq!(
            offline,
            ConnectivityCheck {
                online: false,
                transitioned: false,
                report: None,
            }
        );

        h.probe.set_online(true);
        let back = h.coordinator.check_connectivity().await;
        assert!(back.transitioned);
        let report = back.report.unwrap();
        assert_eq!(report.success_count, 2);
        assert_eq!(h.client.calls(), 2);

        let stayed = h.coordinator.check_connectivity().await;
        assert!(!stayed.transitioned);
        assert_eq!(stayed.report, None);
        assert_eq!(h.client.calls(), 2);

        // Each new transition gets its own run.
        h.probe.set_online(false);
        h.coordinator.check_connectivity().await;
        h.coordinator.submit(payload("M3")).await.unwrap();
        h.probe.set_online(true);
        let again = h.coordinator.check_connectivity().await;
        assert!(again.transitioned);
        assert_eq!(again.report.map(|r| r.success_count), Some(1));
        assert_eq!(h.client.calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn coming_online_with_nothing_to_sync_skips_bulk_sync() {
        let h = harness(FakeSubmitClient::succeeding(), true).await;

        let check = h.coordinator.check_connectivity().await;
        assert!(check.online);
        assert!(check.transitioned);
        assert_eq!(check.report, None);
        assert_eq!(h.coordinator.engine().last_bulk_report(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_state_reflects_connectivity_and_failures() {
        let h = harness(FakeSubmitClient::failing("HTTP 503"), false).await;
        assert_eq!(h.coordinator.sync_state().await, SyncState::Offline);

        h.coordinator.submit(payload("M1")).await.unwrap();
        h.probe.set_online(true);
        h.coordinator.check_connectivity().await;
        assert_eq!(h.coordinator.sync_state().await, SyncState::Error);

        h.client.clear_failures();
        let report = h.coordinator.sync_now().await;
        assert_eq!(report.success_count, 1);
        assert_eq!(h.coordinator.sync_state().await, SyncState::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_polls_and_syncs_after_reconnect() {
        let h = harness(FakeSubmitClient::succeeding(), false).await;
        h.coordinator.submit(payload("M1")).await.unwrap();

        let monitor = h.coordinator.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.probe.checks(), 2); // submit + immediate check
        assert_eq!(h.client.calls(), 0);

        h.probe.set_online(true);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(h.client.calls(), 1);
        assert_eq!(h.coordinator.engine().records().synced_count().await, 1);

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_monitor_no_longer_polls() {
        let h = harness(FakeSubmitClient::succeeding(), false).await;

        let monitor = h.coordinator.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.stop();
        monitor.join().await;
        let checks = h.probe.checks();

        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(h.probe.checks(), checks);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_auto_sync_finish() {
        let h = harness(
            FakeSubmitClient::succeeding().with_delay(Duration::from_secs(5)),
            false,
        )
        .await;
        let record = h.coordinator.submit(payload("M1")).await.unwrap();
        h.probe.set_online(true);

        let monitor = h.coordinator.start();
        while !h.coordinator.engine().is_bulk_sync_in_progress() {
            tokio::task::yield_now().await;
        }
        monitor.stop();
        monitor.join().await;

        let synced = h
            .coordinator
            .engine()
            .records()
            .get(&record.record_id)
            .await
            .unwrap();
        assert_eq!(synced.kind(), SyncStatusKind::Synced);
    }
}
