//! Repository Module
//!
//! The entity-agnostic repository contract, its store-backed core and the
//! read-through caching decorator. Both implementations expose the same
//! contract, so callers never know whether caching is active.

mod cached;
mod generic;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::QueryOptions;
use crate::error::Result;
use crate::models::{Entity, Predicate};
use crate::query::{EntityStream, QueryResult, Snapshot};

pub use cached::CachedRepository;
pub use generic::GenericRepository;

// == Repository ==
/// Reads and writes for one entity collection.
///
/// Every operation observes `cancel` and the implementation's command
/// timeout, failing with `Cancelled` when either fires. Size arguments must
/// be positive; zero is rejected with `InvalidConfiguration` before the store
/// is touched.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Whole collection in one fetch, ordered by identifier.
    async fn get_all(&self, cancel: &CancellationToken) -> Result<Vec<T>>;

    /// One entity, or `NotFound`.
    async fn get_by_id(&self, id: &T::Id, cancel: &CancellationToken) -> Result<T>;

    /// Entities matching `predicate`.
    async fn find(&self, predicate: &Predicate, cancel: &CancellationToken) -> Result<Vec<T>>;

    /// Whole collection read in pages of `chunk_size`.
    async fn get_all_chunked(&self, chunk_size: usize, cancel: &CancellationToken)
        -> Result<Vec<T>>;

    /// Whole collection read as `partitions` concurrent sub-scans.
    async fn get_all_parallel(&self, partitions: usize, cancel: &CancellationToken)
        -> Result<Vec<T>>;

    /// Lazy stream over the collection with `buffer_size` rows of read-ahead.
    async fn get_all_streaming(
        &self,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<EntityStream<T>>;

    /// Shared immutable snapshot of the collection.
    async fn get_all_memory_mapped(&self, cancel: &CancellationToken) -> Result<Snapshot<T>>;

    /// Whole collection using the strategy and sizes in `options`.
    async fn get_all_configurable(
        &self,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<T>>;

    async fn add(&self, entity: T, cancel: &CancellationToken) -> Result<()>;

    /// Fails with a store conflict if the row no longer exists.
    async fn update(&self, entity: T, cancel: &CancellationToken) -> Result<()>;

    /// Fails with a store conflict if the row no longer exists.
    async fn delete(&self, entity: &T, cancel: &CancellationToken) -> Result<()>;

    /// Inserts every entity in a single store round trip.
    async fn bulk_insert(&self, entities: Vec<T>, cancel: &CancellationToken) -> Result<()>;
}
