//! Whole-collection load/replace over a key-value store

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use super::{KeyValueStore, UpdateFn};
use crate::error::{Error, Result};
use crate::models::CachedRecord;

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "cached_reports";

/// Persists the cached record collection as a single serialized blob.
#[derive(Clone)]
pub struct RecordStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl RecordStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(kv, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the full persisted collection.
    ///
    /// Never fails: missing, unreadable or non-array data yields an empty
    /// list. Individual entries that do not decode are skipped, as are
    /// repeated ids (first occurrence wins).
    pub async fn load_all(&self) -> Vec<CachedRecord> {
        self.try_load_all().await.unwrap_or_else(|error| {
            tracing::warn!(
                "Failed to read cached records under '{}': {}",
                self.key,
                error
            );
            Vec::new()
        })
    }

    /// Like [`RecordStore::load_all`], but a failed read is returned instead
    /// of being treated as an empty collection. Corrupt data still decodes to
    /// an empty list.
    pub async fn try_load_all(&self) -> Result<Vec<CachedRecord>> {
        let raw = self.kv.get(&self.key).await?;
        Ok(raw.map(|raw| decode(&self.key, &raw)).unwrap_or_default())
    }

    /// Atomically overwrite the persisted collection.
    pub async fn replace_all(&self, records: &[CachedRecord]) -> Result<()> {
        // Serialize up front so a failure here never touches storage.
        let encoded = serde_json::to_string(records)?;
        self.kv
            .set(&self.key, &encoded)
            .await
            .map_err(Error::persistence)?;
        tracing::debug!("Persisted {} cached records", records.len());
        Ok(())
    }

    /// Load, change and write back the collection as one atomic step of the
    /// underlying store, returning the collection as written.
    ///
    /// Nothing is written when the read or the write fails.
    pub async fn modify<F>(&self, apply: F) -> Result<Vec<CachedRecord>>
    where
        F: FnOnce(&mut Vec<CachedRecord>) + Send,
    {
        let key = self.key.as_str();
        let mut written = None;
        let update: UpdateFn<'_> = Box::new(|current: Option<String>| -> Result<String> {
            let mut records = current
                .map(|raw| decode(key, &raw))
                .unwrap_or_default();
            apply(&mut records);
            let encoded = serde_json::to_string(&records)?;
            written = Some(records);
            Ok(encoded)
        });
        self.kv
            .update(key, update)
            .await
            .map_err(Error::persistence)?;

        let records = written.unwrap_or_default();
        tracing::debug!("Persisted {} cached records", records.len());
        Ok(records)
    }
}

fn decode(key: &str, raw: &str) -> Vec<CachedRecord> {
    let entries = match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!("Discarding unreadable record cache under '{key}': {error}");
            return Vec::new();
        }
    };

    let mut seen = HashSet::with_capacity(entries.len());
    let mut records = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<CachedRecord>(entry) {
            Ok(record) if seen.insert(record.id) => records.push(record),
            Ok(record) => {
                tracing::warn!("Skipping duplicate cached record {}", record.id);
            }
            Err(error) => {
                tracing::warn!("Skipping malformed cached record at index {index}: {error}");
            }
        }
    }
    records
}
