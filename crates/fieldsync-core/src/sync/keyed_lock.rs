//! Per-key in-flight guards.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Set of keys with an operation in flight.
///
/// [`KeyedLock::try_acquire`] hands out at most one [`KeyGuard`] per key; the
/// key becomes available again when the guard is dropped, including when the
/// owning future is cancelled or unwinds.
#[derive(Debug)]
pub struct KeyedLock<K: Eq + Hash> {
    held: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim `key`, or `None` if it is already claimed.
    pub fn try_acquire(&self, key: K) -> Option<KeyGuard<K>> {
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            return None;
        }
        Some(KeyGuard {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, key: &K) -> bool {
        self.held.lock().contains(key)
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct KeyGuard<K: Eq + Hash> {
    held: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash> KeyGuard<K> {
    pub const fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}
