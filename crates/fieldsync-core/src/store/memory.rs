//! In-process key-value store

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{KeyValueStore, UpdateFn};
use crate::error::Result;

/// Volatile [`KeyValueStore`] for tests and embedding hosts that persist
/// elsewhere.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw value directly, bypassing serialization.
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.lock().insert(key.into(), value.into());
    }

    /// Read a raw value synchronously.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.seed(key, value);
        Ok(())
    }

    async fn update(&self, key: &str, apply: UpdateFn<'_>) -> Result<()> {
        let mut values = self.values.lock();
        let next = apply(values.get(key).cloned())?;
        values.insert(key.to_string(), next);
        Ok(())
    }
}
