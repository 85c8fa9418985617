//! Cached Repository
//!
//! Read-through caching decorator over any [`Repository`]. Materializing
//! reads are served from the cache while their entry is live; misses are
//! coalesced per key so concurrent callers share one fetch. Successful writes
//! invalidate every entry they could have made stale.
//!
//! The cache is an optimization only: when the backend fails, reads fall
//! through to the wrapped repository and writes still succeed.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheBackend, CacheKeys, SingleFlight};
use crate::config::{positive, CacheOptions, QueryOptions, QueryStrategy};
use crate::error::{CacheError, RepoError, Result, StoreError};
use crate::models::{Entity, Predicate};
use crate::query::{EntityStream, QueryResult, Snapshot};
use crate::repository::Repository;

// == Cached Repository ==
/// Caching decorator exposing the same contract as the repository it wraps.
///
/// Keys live under `options.cache_key_prefix`. Full-collection reads of every
/// materializing strategy share one entry since they return the same rows in
/// the same order. Streaming and memory-mapped reads are never cached.
pub struct CachedRepository<T: Entity, R: Repository<T>> {
    inner: Arc<R>,
    cache: Arc<dyn CacheBackend>,
    options: CacheOptions,
    keys: CacheKeys,
    flights: SingleFlight<String>,
    /// Bumped by every successful write; a fetch that started under an older
    /// epoch never populates the cache.
    epoch: AtomicU64,
    _entity: PhantomData<fn() -> T>,
}

impl<T, R> CachedRepository<T, R>
where
    T: Entity,
    R: Repository<T>,
{
    pub fn new(inner: Arc<R>, cache: Arc<dyn CacheBackend>, options: CacheOptions) -> Self {
        let keys = CacheKeys::new(options.cache_key_prefix.clone());
        Self {
            inner,
            cache,
            options,
            keys,
            flights: SingleFlight::new(),
            epoch: AtomicU64::new(0),
            _entity: PhantomData,
        }
    }

    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    // == Read Through ==
    /// Returns the cached value under `key`, or fetches, caches and returns it.
    async fn read_through<V, F, Fut>(
        &self,
        key: String,
        ttl: Duration,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if !self.options.enable_caching {
            return fetch().await;
        }

        if let Some((value, _)) = self.lookup::<V>(&key).await {
            return Ok(value);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let flight_key = format!("{}#{}", key, epoch);

        let text = self
            .flights
            .run(&flight_key, cancel, || async {
                // An earlier leader may have filled the entry after our miss
                if let Some((_, text)) = self.lookup::<V>(&key).await {
                    return Ok(text);
                }
                let value = fetch().await?;
                let text = serde_json::to_string(&value).map_err(StoreError::from)?;
                self.populate(&key, &text, ttl, epoch).await;
                Ok::<String, RepoError>(text)
            })
            .await?;

        serde_json::from_str(&text).map_err(|err| RepoError::Store(StoreError::from(err)))
    }

    /// Live cached entry under `key`, decoded and as stored. Misses, backend
    /// failures and undecodable entries all yield `None`.
    async fn lookup<V: DeserializeOwned>(&self, key: &str) -> Option<(V, String)> {
        match self.cache.get(key).await {
            Ok(Some(text)) => match serde_json::from_str::<V>(&text) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    Some((value, text))
                }
                Err(err) => {
                    warn!(key, error = %err, "discarding undecodable cache entry");
                    if let Err(err) = self.cache.remove(key).await {
                        fail_open(key, "remove", err);
                    }
                    None
                }
            },
            Ok(None) => {
                debug!(key, "cache miss");
                None
            }
            Err(err) => {
                fail_open(key, "get", err);
                None
            }
        }
    }

    /// Stores a fetched value unless a write landed after the fetch began.
    async fn populate(&self, key: &str, text: &str, ttl: Duration, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(key, "write during fetch, result not cached");
            return;
        }

        if let Err(err) = self.cache.set(key, text.to_string(), ttl).await {
            fail_open(key, "set", err);
            return;
        }

        // A write may have invalidated between the check and the set
        if self.epoch.load(Ordering::SeqCst) != epoch {
            if let Err(err) = self.cache.remove(key).await {
                fail_open(key, "remove", err);
            }
        }
    }

    // == Invalidation ==
    /// Drops the full-collection entry, the given point entries and every
    /// filtered entry. Backend failures are logged, never returned.
    async fn invalidate(&self, id_keys: Vec<String>) {
        if !self.options.enable_caching {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let point_keys = id_keys.len();
        for key in std::iter::once(self.keys.all()).chain(id_keys) {
            if let Err(err) = self.cache.remove(&key).await {
                fail_open(&key, "remove", err);
            }
        }

        let namespace = self.keys.find_namespace();
        match self.cache.remove_prefix(&namespace).await {
            Ok(removed) => debug!(point_keys, filtered = removed, "cache invalidated"),
            Err(err) => fail_open(&namespace, "remove_prefix", err),
        }
    }

    async fn read_all<F, Fut>(&self, cancel: &CancellationToken, fetch: F) -> Result<Vec<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        self.read_through(
            self.keys.all(),
            self.options.get_all_cache_duration,
            cancel,
            fetch,
        )
        .await
    }
}

/// Absorbs a backend failure. The cache is optional, so the caller carries on
/// as if the entry were absent.
fn fail_open(key: &str, action: &'static str, err: CacheError) {
    let err = RepoError::from(err);
    warn!(key, action, error = %err, "continuing without cache");
}

#[async_trait]
impl<T, R> Repository<T> for CachedRepository<T, R>
where
    T: Entity,
    R: Repository<T> + 'static,
{
    async fn get_all(&self, cancel: &CancellationToken) -> Result<Vec<T>> {
        self.read_all(cancel, || self.inner.get_all(cancel)).await
    }

    async fn get_by_id(&self, id: &T::Id, cancel: &CancellationToken) -> Result<T> {
        self.read_through(
            self.keys.by_id(id),
            self.options.get_by_id_cache_duration,
            cancel,
            || self.inner.get_by_id(id, cancel),
        )
        .await
    }

    async fn find(&self, predicate: &Predicate, cancel: &CancellationToken) -> Result<Vec<T>> {
        self.read_through(
            self.keys.find(predicate),
            self.options.default_cache_duration,
            cancel,
            || self.inner.find(predicate, cancel),
        )
        .await
    }

    async fn get_all_chunked(
        &self,
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        positive("chunk_size", chunk_size)?;
        self.read_all(cancel, || self.inner.get_all_chunked(chunk_size, cancel))
            .await
    }

    async fn get_all_parallel(
        &self,
        partitions: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        positive("parallel_partitions", partitions)?;
        self.read_all(cancel, || self.inner.get_all_parallel(partitions, cancel))
            .await
    }

    async fn get_all_streaming(
        &self,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<EntityStream<T>> {
        self.inner.get_all_streaming(buffer_size, cancel).await
    }

    async fn get_all_memory_mapped(&self, cancel: &CancellationToken) -> Result<Snapshot<T>> {
        self.inner.get_all_memory_mapped(cancel).await
    }

    async fn get_all_configurable(
        &self,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<T>> {
        match options.strategy {
            QueryStrategy::Streaming | QueryStrategy::MemoryMapped => {
                self.inner.get_all_configurable(options, cancel).await
            }
            QueryStrategy::Standard | QueryStrategy::Chunked | QueryStrategy::Parallel => {
                let rows = self
                    .read_all(cancel, || async {
                        self.inner
                            .get_all_configurable(options, cancel)
                            .await?
                            .into_vec()
                            .await
                    })
                    .await?;
                Ok(QueryResult::Materialized(rows))
            }
        }
    }

    async fn add(&self, entity: T, cancel: &CancellationToken) -> Result<()> {
        let id_key = self.keys.by_id(entity.id());
        self.inner.add(entity, cancel).await?;
        self.invalidate(vec![id_key]).await;
        Ok(())
    }

    async fn update(&self, entity: T, cancel: &CancellationToken) -> Result<()> {
        let id_key = self.keys.by_id(entity.id());
        self.inner.update(entity, cancel).await?;
        self.invalidate(vec![id_key]).await;
        Ok(())
    }

    async fn delete(&self, entity: &T, cancel: &CancellationToken) -> Result<()> {
        self.inner.delete(entity, cancel).await?;
        self.invalidate(vec![self.keys.by_id(entity.id())]).await;
        Ok(())
    }

    async fn bulk_insert(&self, entities: Vec<T>, cancel: &CancellationToken) -> Result<()> {
        let id_keys: Vec<String> = entities
            .iter()
            .map(|entity| self.keys.by_id(entity.id()))
            .collect();
        self.inner.bulk_insert(entities, cancel).await?;
        if !id_keys.is_empty() {
            self.invalidate(id_keys).await;
        }
        Ok(())
    }
}
