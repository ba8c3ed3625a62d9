//! Bounded LRU memoizing linked-value pointer -> bytes resolution.
//!
//! Values are written once and never change, so a cached entry can never go
//! stale. Each storage owner constructs its own instance; nothing is global.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::config::LINKED_VALUE_LRU_SIZE;
use crate::types::TxId;

pub struct LinkedValueCache {
    inner: Mutex<LruCache<TxId, Vec<u8>>>,
}

impl LinkedValueCache {
    /// A cache holding at most `capacity` values (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, tx_id: &TxId) -> Option<Vec<u8>> {
        self.inner.lock().get(tx_id).cloned()
    }

    pub fn put(&self, tx_id: TxId, value: Vec<u8>) {
        self.inner.lock().put(tx_id, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}

impl Default for LinkedValueCache {
    fn default() -> Self {
        Self::new(LINKED_VALUE_LRU_SIZE)
    }
}
