//! Cache Backend
//!
//! The async seam between the caching decorator and whatever holds the
//! entries. `MemoryCache` is the in-process implementation over `CacheStore`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::{CacheStats, CacheStore};
use crate::error::{CacheError, CacheResult};

// == Cache Backend ==
/// Key-value storage for serialized query results.
///
/// Any method may fail with `CacheError::Unavailable`; callers treat such
/// failures as a miss rather than an error.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the live value under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores `value` under `key` until `ttl` elapses.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Removes every key starting with `prefix`, returning how many went.
    async fn remove_prefix(&self, prefix: &str) -> CacheResult<usize>;
}

// == Memory Cache ==
/// In-process backend sharing one `CacheStore` behind a tokio `RwLock`.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    store: Arc<RwLock<CacheStore>>,
}

impl MemoryCache {
    /// Creates a cache holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(CacheStore::new(max_entries))),
        }
    }

    /// Shared handle to the underlying store, for the cleanup task.
    pub fn store(&self) -> Arc<RwLock<CacheStore>> {
        Arc::clone(&self.store)
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.read().await.stats()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        // Reads update LRU order and may evict, so they take the write lock
        let mut store = self.store.write().await;
        match store.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(CacheError::NotFound(_)) | Err(CacheError::Expired(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.store.write().await.set(key.to_string(), value, ttl)
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        match self.store.write().await.delete(key) {
            Ok(()) | Err(CacheError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn remove_prefix(&self, prefix: &str) -> CacheResult<usize> {
        Ok(self.store.write().await.remove_prefix(prefix))
    }
}
