//! Generic Repository
//!
//! The uncached repository core: one entity collection over one store, every
//! call bounded by the caller's cancellation token and a command timeout.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{positive, QueryOptions, QueryStrategy};
use crate::error::{RepoError, Result};
use crate::models::{Entity, Predicate};
use crate::query::{
    fetch_all, scan_chunked, scan_parallel, with_deadline, EntityStream, QueryResult, Snapshot,
    SnapshotCell,
};
use crate::repository::Repository;
use crate::store::EntityStore;

// == Generic Repository ==
/// Repository over any [`EntityStore`].
///
/// `options` supplies the command timeout for every call and the page size
/// used by parallel sub-scans. Memory-mapped reads reuse one snapshot for the
/// repository's lifetime; writes do not refresh it.
pub struct GenericRepository<T: Entity, S: EntityStore<T> + ?Sized> {
    store: Arc<S>,
    options: QueryOptions,
    snapshot: SnapshotCell<T>,
}

impl<T, S> GenericRepository<T, S>
where
    T: Entity,
    S: EntityStore<T> + ?Sized + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_options(store, QueryOptions::default())
    }

    pub fn with_options(store: Arc<S>, options: QueryOptions) -> Self {
        Self {
            store,
            options,
            snapshot: SnapshotCell::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Reloads the memory-mapped snapshot from the store.
    ///
    /// Readers holding the previous snapshot keep it; later reads see the new one.
    pub async fn refresh_snapshot(&self, cancel: &CancellationToken) -> Result<Snapshot<T>> {
        let timeout = self.options.command_timeout;
        self.snapshot
            .refresh(|| with_deadline(cancel, timeout, fetch_all(self.store.as_ref())))
            .await
    }

    async fn chunked(
        &self,
        chunk_size: NonZeroUsize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        with_deadline(
            cancel,
            timeout,
            scan_chunked(self.store.as_ref(), chunk_size, None),
        )
        .await
    }

    async fn parallel(
        &self,
        partitions: NonZeroUsize,
        chunk_size: NonZeroUsize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        with_deadline(
            cancel,
            timeout,
            scan_parallel(Arc::clone(&self.store), partitions, chunk_size, cancel),
        )
        .await
    }

    fn streaming(
        &self,
        buffer_size: NonZeroUsize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<EntityStream<T>> {
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled("cancelled before start".to_string()));
        }
        Ok(EntityStream::open(
            Arc::clone(&self.store),
            buffer_size,
            timeout,
            cancel,
        ))
    }

    async fn memory_mapped(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Snapshot<T>> {
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled("cancelled before start".to_string()));
        }
        self.snapshot
            .get_or_load(|| with_deadline(cancel, timeout, fetch_all(self.store.as_ref())))
            .await
    }

    /// Parallel sub-scans page with the repository's chunk size.
    fn sub_scan_chunk(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.options.chunk_size()).unwrap_or(NonZeroUsize::MIN)
    }
}

#[async_trait]
impl<T, S> Repository<T> for GenericRepository<T, S>
where
    T: Entity,
    S: EntityStore<T> + ?Sized + 'static,
{
    async fn get_all(&self, cancel: &CancellationToken) -> Result<Vec<T>> {
        let rows = with_deadline(
            cancel,
            self.options.command_timeout,
            fetch_all(self.store.as_ref()),
        )
        .await?;
        debug!(rows = rows.len(), "standard scan complete");
        Ok(rows)
    }

    async fn get_by_id(&self, id: &T::Id, cancel: &CancellationToken) -> Result<T> {
        let found = with_deadline(cancel, self.options.command_timeout, async {
            self.store.get(id).await.map_err(RepoError::from)
        })
        .await?;
        found.ok_or_else(|| RepoError::NotFound(format!("{:?}", id)))
    }

    async fn find(&self, predicate: &Predicate, cancel: &CancellationToken) -> Result<Vec<T>> {
        let rows = with_deadline(cancel, self.options.command_timeout, async {
            self.store.filter(predicate).await.map_err(RepoError::from)
        })
        .await?;
        debug!(rows = rows.len(), "filtered scan complete");
        Ok(rows)
    }

    async fn get_all_chunked(
        &self,
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let chunk_size = positive("chunk_size", chunk_size)?;
        self.chunked(chunk_size, self.options.command_timeout, cancel)
            .await
    }

    async fn get_all_parallel(
        &self,
        partitions: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let partitions = positive("parallel_partitions", partitions)?;
        self.parallel(
            partitions,
            self.sub_scan_chunk(),
            self.options.command_timeout,
            cancel,
        )
        .await
    }

    async fn get_all_streaming(
        &self,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<EntityStream<T>> {
        let buffer_size = positive("streaming_buffer_size", buffer_size)?;
        self.streaming(buffer_size, self.options.command_timeout, cancel)
    }

    async fn get_all_memory_mapped(&self, cancel: &CancellationToken) -> Result<Snapshot<T>> {
        self.memory_mapped(self.options.command_timeout, cancel).await
    }

    async fn get_all_configurable(
        &self,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<T>> {
        let timeout = options.command_timeout;
        debug!(strategy = %options.strategy, "configurable read");

        match options.strategy {
            QueryStrategy::Standard => {
                let rows = with_deadline(cancel, timeout, fetch_all(self.store.as_ref())).await?;
                Ok(QueryResult::Materialized(rows))
            }
            QueryStrategy::Chunked => {
                let chunk_size = positive("chunk_size", options.chunk_size())?;
                Ok(QueryResult::Materialized(
                    self.chunked(chunk_size, timeout, cancel).await?,
                ))
            }
            QueryStrategy::Parallel => {
                let partitions = positive("parallel_partitions", options.parallel_partitions())?;
                let chunk_size = positive("chunk_size", options.chunk_size())?;
                Ok(QueryResult::Materialized(
                    self.parallel(partitions, chunk_size, timeout, cancel).await?,
                ))
            }
            QueryStrategy::Streaming => {
                let buffer_size =
                    positive("streaming_buffer_size", options.streaming_buffer_size())?;
                Ok(QueryResult::Streaming(
                    self.streaming(buffer_size, timeout, cancel)?,
                ))
            }
            QueryStrategy::MemoryMapped => Ok(QueryResult::Snapshot(
                self.memory_mapped(timeout, cancel).await?,
            )),
        }
    }

    async fn add(&self, entity: T, cancel: &CancellationToken) -> Result<()> {
        with_deadline(cancel, self.options.command_timeout, async {
            self.store.insert(entity).await.map_err(RepoError::from)
        })
        .await
    }

    async fn update(&self, entity: T, cancel: &CancellationToken) -> Result<()> {
        with_deadline(cancel, self.options.command_timeout, async {
            self.store.update(entity).await.map_err(RepoError::from)
        })
        .await
    }

    async fn delete(&self, entity: &T, cancel: &CancellationToken) -> Result<()> {
        with_deadline(cancel, self.options.command_timeout, async {
            self.store.delete(entity.id()).await.map_err(RepoError::from)
        })
        .await
    }

    async fn bulk_insert(&self, entities: Vec<T>, cancel: &CancellationToken) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let count = entities.len();
        with_deadline(cancel, self.options.command_timeout, async {
            self.store
                .insert_batch(entities)
                .await
                .map_err(RepoError::from)
        })
        .await?;
        debug!(count, "bulk insert complete");
        Ok(())
    }
}
