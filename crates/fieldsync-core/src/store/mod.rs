//! Durable storage for the record collection.
//!
//! The whole collection is serialized as one JSON array under a single key of
//! a [`KeyValueStore`]. There are no per-record writes at this layer: every
//! change rewrites the complete list, either through [`RecordStore::replace_all`]
//! or as one atomic read-modify-write with [`RecordStore::modify`].

mod memory;
mod records;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryKeyValueStore;
pub use records::{RecordStore, DEFAULT_STORAGE_KEY};

/// Computes the replacement value of a key from its current value.
pub type UpdateFn<'a> = Box<dyn FnOnce(Option<String>) -> Result<String> + Send + 'a>;

/// Durable key-value persistence consumed by the record store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`. Must be all-or-nothing.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read `key`, compute its replacement and write it back.
    ///
    /// Stores shared between processes must run this as one atomic step so a
    /// concurrent writer cannot slip in between the read and the write. The
    /// default is only atomic with respect to this handle's own callers.
    async fn update(&self, key: &str, apply: UpdateFn<'_>) -> Result<()> {
        let current = self.get(key).await?;
        let next = apply(current)?;
        self.set(key, &next).await
    }
}
