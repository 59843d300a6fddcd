//! Single-record and bulk synchronization against the submit collaborator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::client::SubmitClient;
use super::keyed_lock::KeyedLock;
use crate::error::Result;
use crate::models::{CachedRecord, RecordId, SyncStatus};
use crate::services::RecordManager;

const EMPTY_ERROR_FALLBACK: &str = "Submit failed without an error message";

/// Result of one sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Submitted and acknowledged.
    Synced { reference_id: String },
    /// Was already synced; nothing was submitted.
    AlreadySynced { reference_id: String },
    /// Submit failed; the record is now `failed` with this message.
    Failed { message: String },
    /// No record with that id.
    NotFound,
    /// Another attempt for the same record is still running.
    InFlight,
}

impl SyncOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Synced { .. } | Self::AlreadySynced { .. })
    }
}

/// Aggregate of a bulk sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSyncReport {
    pub success_count: usize,
    pub failed_count: usize,
    /// Records deleted mid-run or busy in another attempt.
    pub skipped_count: usize,
    /// Set when the call returned immediately because a bulk sync was
    /// already running.
    pub already_running: bool,
}

impl BulkSyncReport {
    pub const fn attempted(&self) -> usize {
        self.success_count + self.failed_count
    }

    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Synced { .. } | SyncOutcome::AlreadySynced { .. } => {
                self.success_count += 1;
            }
            SyncOutcome::Failed { .. } => self.failed_count += 1,
            SyncOutcome::NotFound | SyncOutcome::InFlight => self.skipped_count += 1,
        }
    }
}

/// Clears the bulk flag when dropped.
struct BulkRunGuard<'a>(&'a AtomicBool);

impl<'a> BulkRunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BulkRunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives records through `pending -> syncing -> synced | failed`.
pub struct SyncEngine {
    records: Arc<RecordManager>,
    client: Arc<dyn SubmitClient>,
    in_flight: KeyedLock<RecordId>,
    bulk_running: AtomicBool,
    last_bulk_report: Mutex<Option<BulkSyncReport>>,
}

impl SyncEngine {
    pub fn new(records: Arc<RecordManager>, client: Arc<dyn SubmitClient>) -> Self {
        Self {
            records,
            client,
            in_flight: KeyedLock::new(),
            bulk_running: AtomicBool::new(false),
            last_bulk_report: Mutex::new(None),
        }
    }

    pub const fn records(&self) -> &Arc<RecordManager> {
        &self.records
    }

    /// Sync one record, returning `true` once it is synced.
    ///
    /// A record whose attempt could not start is logged and reported as
    /// `false`.
    pub async fn sync_one(&self, id: &RecordId) -> bool {
        match self.sync_record(id).await {
            Ok(outcome) => outcome.is_success(),
            Err(error) => {
                tracing::error!("Sync of record {id} could not start: {}", error);
                false
            }
        }
    }

    /// Sync one record and describe what happened.
    ///
    /// At most one attempt per id runs at a time; a concurrent call returns
    /// [`SyncOutcome::InFlight`] without submitting. Synced records
    /// short-circuit without contacting the remote service.
    ///
    /// An error means the `syncing` transition could not be written and
    /// nothing was submitted. Once the submit has run the outcome is always
    /// returned; if storing it fails, the change stays in memory and goes
    /// out with the next successful write.
    pub async fn sync_record(&self, id: &RecordId) -> Result<SyncOutcome> {
        let Some(_guard) = self.in_flight.try_acquire(*id) else {
            tracing::debug!("Record {id} already has a sync in flight");
            return Ok(SyncOutcome::InFlight);
        };

        let Some(current) = self.records.get(id).await else {
            return Ok(SyncOutcome::NotFound);
        };
        let previous = match current.status {
            SyncStatus::Synced {
                server_reference_id,
            } => {
                return Ok(SyncOutcome::AlreadySynced {
                    reference_id: server_reference_id,
                });
            }
            status => status,
        };

        let Some(snapshot) = self.begin_attempt(id, previous).await? else {
            return Ok(SyncOutcome::NotFound);
        };

        let outcome = match self.client.submit(&snapshot).await {
            Ok(receipt) => {
                tracing::info!("Record {id} synced (reference {})", receipt.reference_id);
                SyncOutcome::Synced {
                    reference_id: receipt.reference_id,
                }
            }
            Err(error) => {
                let mut message = error.to_string();
                if message.trim().is_empty() {
                    message = EMPTY_ERROR_FALLBACK.to_string();
                }
                tracing::warn!("Record {id} failed to sync: {message}");
                SyncOutcome::Failed { message }
            }
        };

        let status = match &outcome {
            SyncOutcome::Synced { reference_id } => SyncStatus::Synced {
                server_reference_id: reference_id.clone(),
            },
            SyncOutcome::Failed { message } => SyncStatus::Failed {
                sync_error: message.clone(),
            },
            SyncOutcome::AlreadySynced { .. } | SyncOutcome::NotFound | SyncOutcome::InFlight => {
                return Ok(outcome);
            }
        };

        // The record may have been deleted while the submit was running.
        let now = self.records.now();
        match self
            .records
            .update(id, move |record| record.transition(status, now))
            .await
        {
            Ok(Some(())) => {}
            Ok(None) => {
                tracing::warn!("Record {id} was removed while syncing; outcome not stored");
            }
            Err(error) => {
                tracing::error!(
                    "Outcome of record {id} is held in memory until the next successful write: {}",
                    error
                );
            }
        }

        Ok(outcome)
    }

    /// Move the record to `syncing` and persist that, returning the snapshot
    /// to submit. On a failed write the previous status is restored in memory.
    async fn begin_attempt(
        &self,
        id: &RecordId,
        previous: SyncStatus,
    ) -> Result<Option<CachedRecord>> {
        let now = self.records.now();
        let started = self
            .records
            .update(id, move |record| {
                record.attempts = record.attempts.saturating_add(1);
                record.transition(SyncStatus::Syncing, now);
                record.clone()
            })
            .await;

        match started {
            Ok(snapshot) => Ok(snapshot),
            Err(error) => {
                self.records
                    .update_in_memory(id, move |record| {
                        record.attempts = record.attempts.saturating_sub(1);
                        record.transition(previous, now);
                    })
                    .await;
                Err(error)
            }
        }
    }

    /// Sync every `pending` and `failed` record, one after another.
    ///
    /// Never stops early on a failing record. Returns immediately with
    /// `already_running` set if another bulk sync is in progress.
    pub async fn sync_all_pending(&self) -> BulkSyncReport {
        let Some(_running) = BulkRunGuard::acquire(&self.bulk_running) else {
            tracing::debug!("Bulk sync already in progress; skipping");
            return BulkSyncReport {
                already_running: true,
                ..BulkSyncReport::default()
            };
        };

        let ids = self.records.retryable_ids().await;
        self.sync_sequentially(&ids).await
    }

    /// Retry only `failed` records.
    pub async fn retry_failed(&self) -> BulkSyncReport {
        let Some(_running) = BulkRunGuard::acquire(&self.bulk_running) else {
            return BulkSyncReport {
                already_running: true,
                ..BulkSyncReport::default()
            };
        };

        let ids = self.records.failed_ids().await;
        self.sync_sequentially(&ids).await
    }

    async fn sync_sequentially(&self, ids: &[RecordId]) -> BulkSyncReport {
        let mut report = BulkSyncReport::default();
        if ids.is_empty() {
            return report;
        }

        tracing::info!("Bulk sync starting for {} record(s)", ids.len());
        for id in ids {
            match self.sync_record(id).await {
                Ok(outcome) => report.record(&outcome),
                Err(error) => {
                    tracing::error!("Sync of record {id} could not start: {}", error);
                    report.failed_count += 1;
                }
            }
        }
        tracing::info!(
            "Bulk sync finished: {} synced, {} failed, {} skipped",
            report.success_count,
            report.failed_count,
            report.skipped_count
        );

        *self.last_bulk_report.lock() = Some(report);
        report
    }

    pub fn is_bulk_sync_in_progress(&self) -> bool {
        self.bulk_running.load(Ordering::Acquire)
    }

    pub fn last_bulk_report(&self) -> Option<BulkSyncReport> {
        *self.last_bulk_report.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatusKind;
    use crate::store::{MemoryKeyValueStore, RecordStore};
    use crate::testing::{payload, FailingKeyValueStore, FakeSubmitClient};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn engine_with(client: Arc<FakeSubmitClient>) -> SyncEngine {
        let records = RecordManager::open(RecordStore::new(Arc::new(MemoryKeyValueStore::new())))
            .await;
        SyncEngine::new(Arc::new(records), client)
    }

    fn assert_reference_invariant(record: &CachedRecord) {
        assert_eq!(
            record.server_reference_id().is_some(),
            record.kind() == SyncStatusKind::Synced
        );
        assert_eq!(
            record.sync_error().is_some(),
            record.kind() == SyncStatusKind::Failed
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_one_success_stores_reference() {
        let client = Arc::new(FakeSubmitClient::succeeding().with_reference("REF-42"));
        let engine = engine_with(client.clone()).await;
        let record = engine.records().add_record(payload("M2")).await.unwrap();

        assert!(engine.sync_one(&record.id).await);

        let synced = engine.records().get(&record.id).await.unwrap();
        assert_eq!(synced.server_reference_id(), Some("REF-42"));
        assert_eq!(synced.sync_error(), None);
        assert_eq!(synced.attempts, 1);
        assert_reference_invariant(&synced);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_one_failure_keeps_record_as_failed() {
        let client = Arc::new(FakeSubmitClient::failing("connection reset"));
        let engine = engine_with(client).await;
        let record = engine.records().add_record(payload("M1")).await.unwrap();

        assert!(!engine.sync_one(&record.id).await);

        let failed = engine.records().get(&record.id).await.unwrap();
        assert_eq!(failed.kind(), SyncStatusKind::Failed);
        assert_eq!(failed.sync_error(), Some("connection reset"));
        assert_reference_invariant(&failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_error_message_is_replaced() {
        let client = Arc::new(FakeSubmitClient::failing(""));
        let engine = engine_with(client).await;
        let record = engine.records().add_record(payload("M1")).await.unwrap();

        let outcome = engine.sync_record(&record.id).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Failed {
                message: EMPTY_ERROR_FALLBACK.to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_record_can_be_retried() {
        let client = Arc::new(FakeSubmitClient::succeeding());
        client.fail_meter("M1");
        let engine = engine_with(client.clone()).await;
        let record = engine.records().add_record(payload("M1")).await.unwrap();

        assert!(!engine.sync_one(&record.id).await);
        client.clear_failures();
        assert!(engine.sync_one(&record.id).await);

        let synced = engine.records().get(&record.id).await.unwrap();
        assert_eq!(synced.kind(), SyncStatusKind::Synced);
        assert_eq!(synced.sync_error(), None);
        assert_eq!(synced.attempts, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_id_is_not_found() {
        let engine = engine_with(Arc::new(FakeSubmitClient::succeeding())).await;
        let outcome = engine.sync_record(&RecordId::new()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::NotFound);
        assert!(!engine.sync_one(&RecordId::new()).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn synced_record_short_circuits() {
        let client = Arc::new(FakeSubmitClient::succeeding().with_reference("REF-1"));
        let engine = engine_with(client.clone()).await;
        let record = engine.records().add_record(payload("M1")).await.unwrap();

        assert!(engine.sync_one(&record.id).await);
        let outcome = engine.sync_record(&record.id).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::AlreadySynced {
                reference_id: "REF-1".to_string()
            }
        );
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_sync_of_same_record_submits_once() {
        let client =
            Arc::new(FakeSubmitClient::succeeding().with_delay(Duration::from_millis(100)));
        let engine = Arc::new(engine_with(client.clone()).await);
        let record = engine.records().add_record(payload("M1")).await.unwrap();

        let (first, second) = tokio::join!(
            engine.sync_record(&record.id),
            engine.sync_record(&record.id)
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        assert_eq!(client.calls(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| **outcome == SyncOutcome::InFlight)
                .count(),
            1
        );
        assert_eq!(
            outcomes.iter().filter(|outcome| outcome.is_success()).count(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_sync_all_success_counts_pending_and_failed() {
        let client = Arc::new(FakeSubmitClient::failing("offline"));
        let engine = engine_with(client.clone()).await;
        for index in 0..3 {
            engine
                .records()
                .add_record(payload(&format!("M{index}")))
                .await
                .unwrap();
        }
        // Two failed, then two more pending.
        let first_ids = engine.records().retryable_ids().await;
        engine.sync_one(&first_ids[0]).await;
        engine.sync_one(&first_ids[1]).await;
        engine.records().add_record(payload("M3")).await.unwrap();
        assert_eq!(engine.records().failed_count().await, 2);
        assert_eq!(engine.records().pending_count().await, 2);

        client.set_failing(None);
        let report = engine.sync_all_pending().await;

        assert_eq!(report.success_count, 4);
        assert_eq!(report.failed_count, 0);
        assert_eq!(engine.records().synced_count().await, 4);
        for record in engine.records().list().await {
            assert_reference_invariant(&record);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_sync_all_failure_counts_everything_failed() {
        let client = Arc::new(FakeSubmitClient::failing("HTTP 503"));
        let engine = engine_with(client).await;
        for index in 0..4 {
            engine
                .records()
                .add_record(payload(&format!("M{index}")))
                .await
                .unwrap();
        }

        let report = engine.sync_all_pending().await;
        assert_eq!(report.success_count, 0);
        assert_eq!(report.failed_count, 4);
        assert_eq!(engine.records().failed_count().await, 4);
        assert_eq!(engine.records().counts().await.total(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_sync_mixed_results() {
        let client = Arc::new(FakeSubmitClient::succeeding());
        client.fail_meter("M1");
        let engine = engine_with(client.clone()).await;
        let first = engine.records().add_record(payload("M1")).await.unwrap();
        let second = engine.records().add_record(payload("M2")).await.unwrap();

        let report = engine.sync_all_pending().await;

        assert_eq!(report.success_count, 1);
        assert_eq!(report.failed_count, 1);
        let first = engine.records().get(&first.id).await.unwrap();
        let second = engine.records().get(&second.id).await.unwrap();
        assert_eq!(first.kind(), SyncStatusKind::Failed);
        assert!(!first.sync_error().unwrap_or_default().is_empty());
        assert_eq!(second.kind(), SyncStatusKind::Synced);
        assert_eq!(client.submitted(), vec![first.id, second.id]);
        assert_eq!(engine.last_bulk_report(), Some(report));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_sync_is_sequential() {
        let client =
            Arc::new(FakeSubmitClient::succeeding().with_delay(Duration::from_millis(20)));
        let engine = engine_with(client.clone()).await;
        for index in 0..5 {
            engine
                .records()
                .add_record(payload(&format!("M{index}")))
                .await
                .unwrap();
        }

        engine.sync_all_pending().await;
        assert_eq!(client.max_concurrent(), 1);
        assert_eq!(client.calls(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_bulk_sync_is_rejected_while_running() {
        let client =
            Arc::new(FakeSubmitClient::succeeding().with_delay(Duration::from_millis(100)));
        let engine = Arc::new(engine_with(client.clone()).await);
        engine.records().add_record(payload("M1")).await.unwrap();

        let background = Arc::clone(&engine);
        let running = tokio::spawn(async move { background.sync_all_pending().await });
        while !engine.is_bulk_sync_in_progress() {
            tokio::task::yield_now().await;
        }

        let skipped = engine.sync_all_pending().await;
        assert!(skipped.already_running);
        assert_eq!(skipped.attempted(), 0);

        let report = running.await.unwrap();
        assert_eq!(report.success_count, 1);
        assert!(!engine.is_bulk_sync_in_progress());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_failed_skips_pending() {
        let client = Arc::new(FakeSubmitClient::succeeding());
        client.fail_meter("M1");
        let engine = engine_with(client.clone()).await;
        let failed = engine.records().add_record(payload("M1")).await.unwrap();
        engine.sync_one(&failed.id).await;
        let pending = engine.records().add_record(payload("M2")).await.unwrap();

        client.clear_failures();
        let report = engine.retry_failed().await;

        assert_eq!(report.success_count, 1);
        assert_eq!(
            engine.records().get(&pending.id).await.unwrap().kind(),
            SyncStatusKind::Pending
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn record_removed_mid_sync_is_not_resurrected() {
        let client =
            Arc::new(FakeSubmitClient::succeeding().with_delay(Duration::from_millis(100)));
        let engine = Arc::new(engine_with(client).await);
        let record = engine.records().add_record(payload("M1")).await.unwrap();

        let background = Arc::clone(&engine);
        let id = record.id;
        let task = tokio::spawn(async move { background.sync_record(&id).await });
        while engine.records().get(&record.id).await.map(|r| r.kind())
            != Some(SyncStatusKind::Syncing)
        {
            tokio::task::yield_now().await;
        }
        assert!(engine.records().remove_record(&record.id).await.unwrap());

        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.is_success());
        assert!(engine.records().get(&record.id).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_syncing_write_restores_status_without_submitting() {
        let kv = Arc::new(FailingKeyValueStore::new());
        let records = Arc::new(RecordManager::open(RecordStore::new(kv.clone())).await);
        let client = Arc::new(FakeSubmitClient::succeeding());
        let engine = SyncEngine::new(Arc::clone(&records), client.clone());
        let record = records.add_record(payload("M1")).await.unwrap();

        kv.fail_writes(true);
        assert!(engine.sync_record(&record.id).await.is_err());
        assert!(!engine.sync_one(&record.id).await);

        let restored = records.get(&record.id).await.unwrap();
        assert_eq!(restored.kind(), SyncStatusKind::Pending);
        assert_eq!(restored.attempts, 0);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_write_after_submit_still_counts_as_synced() {
        let kv = Arc::new(FailingKeyValueStore::new());
        let records = Arc::new(RecordManager::open(RecordStore::new(kv.clone())).await);
        let client = Arc::new(
            FakeSubmitClient::succeeding()
                .with_reference("REF-9")
                .with_delay(Duration::from_millis(100)),
        );
        let engine = Arc::new(SyncEngine::new(Arc::clone(&records), client.clone()));
        let record = records.add_record(payload("M1")).await.unwrap();

        let background = Arc::clone(&engine);
        let running = tokio::spawn(async move { background.sync_all_pending().await });
        while RecordStore::new(kv.clone())
            .load_all()
            .await
            .first()
            .map(CachedRecord::kind)
            != Some(SyncStatusKind::Syncing)
        {
            tokio::task::yield_now().await;
        }
        kv.fail_writes(true);

        let report = running.await.unwrap();
        assert_eq!(report.success_count, 1);
        assert_eq!(report.failed_count, 0);
        assert_eq!(client.calls(), 1);

        let in_memory = records.get(&record.id).await.unwrap();
        assert_eq!(in_memory.server_reference_id(), Some("REF-9"));
        let on_disk = RecordStore::new(kv.clone()).load_all().await;
        assert_eq!(on_disk[0].kind(), SyncStatusKind::Syncing);

        // The next successful write carries the outcome, so nothing is
        // submitted twice after a restart.
        kv.fail_writes(false);
        records.add_record(payload("M2")).await.unwrap();
        let reopened = RecordManager::open(RecordStore::new(kv)).await;
        let stored = reopened.get(&record.id).await.unwrap();
        assert_eq!(stored.server_reference_id(), Some("REF-9"));
        assert_eq!(reopened.retryable_ids().await.len(), 1);
    }
}
