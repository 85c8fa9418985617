//! TTL Cleanup Task
//!
//! Expired entries are already invisible to readers; this task reclaims their
//! memory even for keys nobody reads again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheStore;

/// Spawns a task that removes expired cache entries every
/// `cleanup_interval_secs` seconds (at least one).
///
/// The returned handle is aborted by the owner on shutdown.
///
/// # Example
/// ```ignore
/// let cache = MemoryCache::new(config.cache_max_entries);
/// let cleanup_handle = spawn_cleanup_task(cache.store(), config.cleanup_interval);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(
    cache: Arc<RwLock<CacheStore>>,
    cleanup_interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "starting cache cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let (removed, remaining) = {
                let mut cache_guard = cache.write().await;
                let removed = cache_guard.cleanup_expired();
                (removed, cache_guard.len())
            };

            if removed > 0 {
                info!(removed, remaining, "cache cleanup removed expired entries");
            } else {
                debug!(remaining, "cache cleanup found no expired entries");
            }
        }
    })
}
