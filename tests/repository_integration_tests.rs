//! Integration Tests for the Repository Layer
//!
//! Drives the public API end to end: store, repository core, caching
//! decorator and cache backend wired together the way an application would.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use entity_repo::{
    CacheOptions, CachedRepository, Entity, EntityStream, GenericRepository, InMemoryStore,
    MemoryCache, Predicate, QueryOptions, QueryResult, QueryStrategy, RepoError, Repository,
    Result, Snapshot,
};

// == Fixtures ==

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Appointment {
    id: u64,
    customer: String,
    service: String,
    minutes: u32,
}

impl Entity for Appointment {
    type Id = u64;

    fn id(&self) -> &u64 {
        &self.id
    }
}

fn appointment(id: u64) -> Appointment {
    Appointment {
        id,
        customer: format!("customer-{}", id % 7),
        service: if id % 3 == 0 { "haircut" } else { "massage" }.to_string(),
        minutes: 15 * (1 + (id % 4) as u32),
    }
}

type Core = GenericRepository<Appointment, InMemoryStore<Appointment>>;

/// Wraps a repository and counts the calls that reach it.
struct Counting<R> {
    inner: R,
    get_all: AtomicUsize,
    get_by_id: AtomicUsize,
}

impl<R> Counting<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            get_all: AtomicUsize::new(0),
            get_by_id: AtomicUsize::new(0),
        }
    }

    fn get_all_calls(&self) -> usize {
        self.get_all.load(Ordering::SeqCst)
    }

    fn get_by_id_calls(&self) -> usize {
        self.get_by_id.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Repository<Appointment>> Repository<Appointment> for Counting<R> {
    async fn get_all(&self, cancel: &CancellationToken) -> Result<Vec<Appointment>> {
        self.get_all.fetch_add(1, Ordering::SeqCst);
        self.inner.get_all(cancel).await
    }

    async fn get_by_id(&self, id: &u64, cancel: &CancellationToken) -> Result<Appointment> {
        self.get_by_id.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_id(id, cancel).await
    }

    async fn find(
        &self,
        predicate: &Predicate,
        cancel: &CancellationToken,
    ) -> Result<Vec<Appointment>> {
        self.inner.find(predicate, cancel).await
    }

    async fn get_all_chunked(
        &self,
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Appointment>> {
        self.inner.get_all_chunked(chunk_size, cancel).await
    }

    async fn get_all_parallel(
        &self,
        partitions: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Appointment>> {
        self.inner.get_all_parallel(partitions, cancel).await
    }

    async fn get_all_streaming(
        &self,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<EntityStream<Appointment>> {
        self.inner.get_all_streaming(buffer_size, cancel).await
    }

    async fn get_all_memory_mapped(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Snapshot<Appointment>> {
        self.inner.get_all_memory_mapped(cancel).await
    }

    async fn get_all_configurable(
        &self,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<Appointment>> {
        self.inner.get_all_configurable(options, cancel).await
    }

    async fn add(&self, entity: Appointment, cancel: &CancellationToken) -> Result<()> {
        self.inner.add(entity, cancel).await
    }

    async fn update(&self, entity: Appointment, cancel: &CancellationToken) -> Result<()> {
        self.inner.update(entity, cancel).await
    }

    async fn delete(&self, entity: &Appointment, cancel: &CancellationToken) -> Result<()> {
        self.inner.delete(entity, cancel).await
    }

    async fn bulk_insert(
        &self,
        entities: Vec<Appointment>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner.bulk_insert(entities, cancel).await
    }
}

struct Harness {
    store: Arc<InMemoryStore<Appointment>>,
    counted: Arc<Counting<Core>>,
    cache: MemoryCache,
    repo: Arc<CachedRepository<Appointment, Counting<Core>>>,
}

fn harness(rows: u64, options: CacheOptions) -> Harness {
    let store = Arc::new(InMemoryStore::with_entities((1..=rows).map(appointment)));
    let counted = Arc::new(Counting::new(GenericRepository::new(Arc::clone(&store))));
    let cache = MemoryCache::new(1_000);
    let repo = Arc::new(CachedRepository::new(
        Arc::clone(&counted),
        Arc::new(cache.clone()),
        options,
    ));
    Harness {
        store,
        counted,
        cache,
        repo,
    }
}

fn ids(rows: &[Appointment]) -> Vec<u64> {
    rows.iter().map(|a| a.id).collect()
}

// == Strategy Equivalence ==

#[tokio::test]
async fn test_chunked_matches_standard_for_many_chunk_sizes() {
    let core = GenericRepository::new(Arc::new(InMemoryStore::with_entities(
        (1..=61).map(appointment),
    )));
    let cancel = CancellationToken::new();
    let standard = assert_ok!(core.get_all(&cancel).await);

    for chunk in [1, 2, 7, 10, 60, 61, 62, 1_000] {
        let chunked = assert_ok!(core.get_all_chunked(chunk, &cancel).await);
        let unique: BTreeSet<u64> = ids(&chunked).into_iter().collect();
        assert_eq!(unique.len(), chunked.len(), "duplicates with chunk {}", chunk);
        assert_eq!(chunked, standard, "chunk {}", chunk);
    }
}

#[tokio::test]
async fn test_parallel_matches_standard_for_many_partition_counts() {
    let core = GenericRepository::new(Arc::new(InMemoryStore::with_entities(
        (1..=97).map(appointment),
    )));
    let cancel = CancellationToken::new();
    let standard = assert_ok!(core.get_all(&cancel).await);

    for partitions in [1, 2, 3, 4, 8, 16, 200] {
        let parallel = assert_ok!(core.get_all_parallel(partitions, &cancel).await);
        assert_eq!(parallel, standard, "partitions {}", partitions);
    }
}

#[tokio::test]
async fn test_twenty_five_rows_chunked_by_ten() {
    let store = Arc::new(InMemoryStore::with_entities((1..=25).map(appointment)));
    let core = GenericRepository::new(Arc::clone(&store));
    let cancel = CancellationToken::new();

    let rows = assert_ok!(core.get_all_chunked(10, &cancel).await);

    assert_eq!(ids(&rows), (1..=25).collect::<Vec<_>>());
    assert_eq!(store.stats().page_sizes, vec![10, 10, 5]);
}

#[tokio::test]
async fn test_chunk_boundaries() {
    let store = Arc::new(InMemoryStore::with_entities((1..=9).map(appointment)));
    let core = GenericRepository::new(Arc::clone(&store));
    let cancel = CancellationToken::new();

    assert_eq!(assert_ok!(core.get_all_chunked(1, &cancel).await).len(), 9);

    store.reset_stats();
    assert_eq!(assert_ok!(core.get_all_chunked(50, &cancel).await).len(), 9);
    assert_eq!(store.stats().page_sizes, vec![9]);
}

// == Streaming Backpressure ==

#[tokio::test]
async fn test_streaming_never_buffers_more_than_buffer_size() {
    let store = Arc::new(InMemoryStore::with_entities((1..=300).map(appointment)));
    let core = GenericRepository::new(Arc::clone(&store));
    let cancel = CancellationToken::new();

    for buffer_size in [1, 3, 16] {
        store.reset_stats();
        let mut stream = assert_ok!(core.get_all_streaming(buffer_size, &cancel).await);
        let mut seen = 0u64;
        while let Some(row) = stream.next().await {
            assert_ok!(row);
            seen += 1;
            if seen % 10 == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let held = store.stats().rows_read - seen;
                assert!(
                    held <= buffer_size as u64,
                    "holding {} unread rows with capacity {}",
                    held,
                    buffer_size
                );
            }
        }
        assert_eq!(seen, 300);
        assert!(stream.peak_buffered() <= buffer_size);
    }
}

#[tokio::test]
async fn test_idle_stream_reads_at_most_buffer_size_rows() {
    let store = Arc::new(InMemoryStore::with_entities((1..=100).map(appointment)));
    let core = GenericRepository::new(Arc::clone(&store));
    let cancel = CancellationToken::new();

    let mut stream = assert_ok!(core.get_all_streaming(4, &cancel).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.stats().rows_read, 4);

    assert_ok!(stream.next().await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.stats().rows_read - 1, 4);
}

// == Caching Decorator ==

#[tokio::test]
async fn test_cached_read_is_identical_and_skips_inner() {
    let h = harness(12, CacheOptions::new("appointments"));
    let cancel = CancellationToken::new();

    let first = assert_ok!(h.repo.get_all(&cancel).await);
    let second = assert_ok!(h.repo.get_all(&cancel).await);

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(h.counted.get_all_calls(), 1);
}

#[tokio::test]
async fn test_expired_entry_triggers_exactly_one_new_call() {
    let options = CacheOptions {
        get_all_cache_duration: Duration::from_millis(60),
        ..CacheOptions::new("appointments")
    };
    let h = harness(5, options);
    let cancel = CancellationToken::new();

    assert_ok!(h.repo.get_all(&cancel).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_ok!(h.repo.get_all(&cancel).await);
    assert_ok!(h.repo.get_all(&cancel).await);
    assert_eq!(h.counted.get_all_calls(), 2);
}

#[tokio::test]
async fn test_concurrent_get_by_id_triggers_one_inner_call() {
    let h = harness(10, CacheOptions::new("appointments"));
    h.store.set_latency(Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0..25 {
        let repo = Arc::clone(&h.repo);
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            repo.get_by_id(&7, &cancel).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(assert_ok!(handle.await.unwrap()));
    }

    assert!(results.iter().all(|a| *a == appointment(7)));
    assert_eq!(h.counted.get_by_id_calls(), 1);
    assert_eq!(h.store.stats().point_lookups, 1);
}

#[tokio::test]
async fn test_update_then_get_by_id_never_returns_old_value() {
    let h = harness(4, CacheOptions::new("appointments"));
    let cancel = CancellationToken::new();

    for minutes in [20, 35, 50] {
        assert_ok!(h.repo.get_by_id(&3, &cancel).await);
        let mut changed = appointment(3);
        changed.minutes = minutes;
        assert_ok!(h.repo.update(changed, &cancel).await);

        let read = assert_ok!(h.repo.get_by_id(&3, &cancel).await);
        assert_eq!(read.minutes, minutes);
    }
}

#[tokio::test]
async fn test_delete_then_reads_reflect_removal() {
    let h = harness(4, CacheOptions::new("appointments"));
    let cancel = CancellationToken::new();
    let haircuts = Predicate::eq("service", "haircut");

    assert_eq!(assert_ok!(h.repo.find(&haircuts, &cancel).await).len(), 1);
    assert_ok!(h.repo.get_by_id(&3, &cancel).await);
    assert_ok!(h.repo.get_all(&cancel).await);

    assert_ok!(h.repo.delete(&appointment(3), &cancel).await);

    assert!(assert_ok!(h.repo.find(&haircuts, &cancel).await).is_empty());
    assert!(matches!(
        h.repo.get_by_id(&3, &cancel).await,
        Err(RepoError::NotFound(_))
    ));
    assert_eq!(ids(&assert_ok!(h.repo.get_all(&cancel).await)), vec![1, 2, 4]);
}

#[tokio::test]
async fn test_caching_disabled_calls_inner_every_time() {
    let h = harness(6, CacheOptions::disabled());
    let cancel = CancellationToken::new();

    assert_ok!(h.repo.get_all(&cancel).await);
    assert_ok!(h.repo.get_all(&cancel).await);

    assert_eq!(h.counted.get_all_calls(), 2);
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn test_cleanup_task_reclaims_expired_results() {
    let options = CacheOptions {
        get_all_cache_duration: Duration::from_millis(100),
        ..CacheOptions::new("appointments")
    };
    let h = harness(3, options);
    let cancel = CancellationToken::new();
    let cleanup = entity_repo::spawn_cleanup_task(h.cache.store(), 1);

    assert_ok!(h.repo.get_all(&cancel).await);
    assert_eq!(h.cache.len().await, 1);

    tokio::time::sleep(Duration::from_millis(1_300)).await;
    assert!(h.cache.is_empty().await);

    cleanup.abort();
}

// == Cancellation ==

#[tokio::test]
async fn test_parallel_cancellation_returns_no_rows() {
    let store = Arc::new(InMemoryStore::with_entities((1..=400).map(appointment)));
    store.set_latency(Duration::from_millis(10));
    let options = assert_ok!(QueryOptions::default().with_chunk_size(5));
    let core = GenericRepository::with_options(Arc::clone(&store), options);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.cancel();
    });

    let result = core.get_all_parallel(4, &cancel).await;
    assert!(matches!(result, Err(RepoError::Cancelled(_))));

    // Aborted sub-scans stop issuing pages
    let pages = store.stats().scans;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(store.stats().scans <= pages + 4);
}

#[tokio::test]
async fn test_cancelled_streaming_read_through_decorator() {
    let h = harness(500, CacheOptions::new("appointments"));
    let cancel = CancellationToken::new();

    let mut stream = assert_ok!(h.repo.get_all_streaming(4, &cancel).await);
    assert_ok!(stream.next().await.unwrap());
    cancel.cancel();

    assert_err!(stream.next().await.unwrap());
    assert!(stream.next().await.is_none());
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn test_invalid_sizes_are_configuration_errors() {
    assert!(matches!(
        QueryOptions::new(QueryStrategy::Chunked).with_chunk_size(0),
        Err(RepoError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        QueryOptions::new(QueryStrategy::Parallel).with_parallel_partitions(0),
        Err(RepoError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        QueryOptions::new(QueryStrategy::Streaming).with_streaming_buffer_size(0),
        Err(RepoError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        "vectorized".parse::<QueryStrategy>(),
        Err(RepoError::InvalidConfiguration(_))
    ));
}
