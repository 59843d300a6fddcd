//! Record lifecycle: create, delete, clear and status bookkeeping.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::models::{CachedRecord, RecordCounts, RecordId, ReportPayload, SyncStatus};
use crate::store::RecordStore;

/// Owns the in-memory record collection and keeps the persisted copy in step.
///
/// Every mutation is read-modify-write-persist of the whole collection while
/// the collection lock is held. The read goes back to storage, because other
/// processes may share it, and the write is one atomic update of the store,
/// so writers never lose each other's records. When persisting fails the
/// in-memory change is kept, carried into the next write, and the error is
/// returned to the caller.
pub struct RecordManager {
    store: RecordStore,
    clock: Arc<dyn Clock>,
    collection: Mutex<Collection>,
}

/// In-memory view plus the ids whose latest change has not reached storage.
#[derive(Default)]
struct Collection {
    records: Vec<CachedRecord>,
    unsaved: HashSet<RecordId>,
}

impl Collection {
    /// Lay unsaved local changes over a collection read from storage.
    fn overlay(&self, persisted: &mut Vec<CachedRecord>) {
        if self.unsaved.is_empty() {
            return;
        }

        persisted.retain(|record| {
            !self.unsaved.contains(&record.id)
                || self.records.iter().any(|local| local.id == record.id)
        });
        for local in self
            .records
            .iter()
            .filter(|record| self.unsaved.contains(&record.id))
        {
            match persisted.iter_mut().find(|record| record.id == local.id) {
                Some(slot) => *slot = local.clone(),
                None => persisted.push(local.clone()),
            }
        }
    }
}

/// Reset `syncing` records to `pending`, returning their ids.
fn reset_interrupted(records: &mut [CachedRecord], now: i64) -> Vec<RecordId> {
    records
        .iter_mut()
        .filter(|record| matches!(record.status, SyncStatus::Syncing))
        .map(|record| {
            record.transition(SyncStatus::Pending, now);
            record.id
        })
        .collect()
}

impl RecordManager {
    /// Load the persisted collection using the system clock.
    pub async fn open(store: RecordStore) -> Self {
        Self::open_with_clock(store, Arc::new(SystemClock)).await
    }

    /// Load the persisted collection.
    ///
    /// No request survives a restart, so any record left `syncing` by a
    /// previous process is reset to `pending`.
    pub async fn open_with_clock(store: RecordStore, clock: Arc<dyn Clock>) -> Self {
        let mut records = store.load_all().await;
        let now = clock.now_millis();
        let interrupted = reset_interrupted(&mut records, now);
        let mut collection = Collection {
            records,
            unsaved: HashSet::new(),
        };

        if !interrupted.is_empty() {
            tracing::warn!(
                "Reset {} record(s) interrupted mid-sync to pending",
                interrupted.len()
            );
            // Only records still `syncing` in storage are reset.
            match store
                .modify(move |persisted| {
                    reset_interrupted(persisted, now);
                })
                .await
            {
                Ok(written) => collection.records = written,
                Err(error) => {
                    tracing::warn!("Failed to persist interrupted-sync repair: {}", error);
                    collection.unsaved.extend(interrupted);
                }
            }
        }

        tracing::info!(
            "Loaded {} cached record(s) from '{}'",
            collection.records.len(),
            store.key()
        );

        Self {
            store,
            clock,
            collection: Mutex::new(collection),
        }
    }

    /// Current time from the injected clock (Unix ms).
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Cache a new report as `pending`.
    ///
    /// The record is kept in memory even when persisting fails; the
    /// persistence error is still returned.
    pub async fn add_record(&self, payload: ReportPayload) -> Result<CachedRecord> {
        let mut record = CachedRecord::new(payload, self.now());
        let mut collection = self.lock_current().await;
        while collection.records.iter().any(|existing| existing.id == record.id) {
            record.id = RecordId::new();
        }
        collection.records.push(record.clone());
        collection.unsaved.insert(record.id);
        tracing::debug!("Cached record {} ({})", record.id, record.payload.summary());

        self.persist(&mut collection).await?;
        Ok(record)
    }

    /// Delete a record. Returns `false` when no record had that id.
    pub async fn remove_record(&self, id: &RecordId) -> Result<bool> {
        let mut collection = self.lock_current().await;
        let before = collection.records.len();
        collection.records.retain(|record| record.id != *id);
        if collection.records.len() == before {
            return Ok(false);
        }
        collection.unsaved.insert(*id);

        tracing::debug!("Removed record {id}");
        self.persist(&mut collection).await?;
        Ok(true)
    }

    /// Drop every `synced` record, returning how many were removed.
    pub async fn clear_synced_records(&self) -> Result<usize> {
        let mut collection = self.lock_current().await;
        let synced = collection
            .records
            .iter()
            .filter(|record| matches!(record.status, SyncStatus::Synced { .. }))
            .map(|record| record.id)
            .collect::<Vec<_>>();
        if synced.is_empty() {
            return Ok(0);
        }

        collection
            .records
            .retain(|record| !matches!(record.status, SyncStatus::Synced { .. }));
        collection.unsaved.extend(synced.iter().copied());

        tracing::info!("Cleared {} synced record(s)", synced.len());
        self.persist(&mut collection).await?;
        Ok(synced.len())
    }

    pub async fn pending_count(&self) -> usize {
        self.counts().await.pending
    }

    pub async fn synced_count(&self) -> usize {
        self.counts().await.synced
    }

    pub async fn failed_count(&self) -> usize {
        self.counts().await.failed
    }

    pub async fn counts(&self) -> RecordCounts {
        let collection = self.lock_current().await;
        RecordCounts::tally(collection.records.iter().map(|record| &record.status))
    }

    pub async fn get(&self, id: &RecordId) -> Option<CachedRecord> {
        let collection = self.lock_current().await;
        collection
            .records
            .iter()
            .find(|record| record.id == *id)
            .cloned()
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<CachedRecord> {
        let mut records = self.lock_current().await.records.clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }

    /// Ids of `pending` and `failed` records, in creation order.
    pub async fn retryable_ids(&self) -> Vec<RecordId> {
        let collection = self.lock_current().await;
        collection
            .records
            .iter()
            .filter(|record| record.is_retryable())
            .map(|record| record.id)
            .collect()
    }

    /// Ids of `failed` records, in creation order.
    pub async fn failed_ids(&self) -> Vec<RecordId> {
        let collection = self.lock_current().await;
        collection
            .records
            .iter()
            .filter(|record| matches!(record.status, SyncStatus::Failed { .. }))
            .map(|record| record.id)
            .collect()
    }

    /// Apply `apply` to one record and persist the collection.
    ///
    /// Returns `Ok(None)` when the record no longer exists; nothing is written
    /// in that case.
    pub(crate) async fn update<R, F>(&self, id: &RecordId, apply: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut CachedRecord) -> R + Send,
        R: Send,
    {
        let mut collection = self.lock_current().await;
        let Some(record) = collection
            .records
            .iter_mut()
            .find(|record| record.id == *id)
        else {
            return Ok(None);
        };
        let result = apply(record);
        collection.unsaved.insert(*id);

        self.persist(&mut collection).await?;
        Ok(Some(result))
    }

    /// Apply `apply` to one record without persisting.
    pub(crate) async fn update_in_memory<R, F>(&self, id: &RecordId, apply: F) -> Option<R>
    where
        F: FnOnce(&mut CachedRecord) -> R + Send,
        R: Send,
    {
        let mut collection = self.collection.lock().await;
        collection
            .records
            .iter_mut()
            .find(|record| record.id == *id)
            .map(apply)
    }

    /// Lock the collection after catching up with storage.
    async fn lock_current(&self) -> MutexGuard<'_, Collection> {
        let mut collection = self.collection.lock().await;
        match self.store.try_load_all().await {
            Ok(mut persisted) => {
                collection.overlay(&mut persisted);
                collection.records = persisted;
            }
            Err(error) => {
                tracing::warn!("Failed to reload cached records, using memory: {}", error);
            }
        }
        collection
    }

    /// Write unsaved changes on top of what storage holds now.
    async fn persist(&self, collection: &mut Collection) -> Result<()> {
        let view = &*collection;
        let written = self
            .store
            .modify(move |persisted| view.overlay(persisted))
            .await
            .map_err(|error| {
                tracing::error!("Failed to persist cached records: {}", error);
                error
            })?;

        collection.records = written;
        collection.unsaved.clear();
        Ok(())
    }
}
