//! Entity Store Module
//!
//! The storage contract the data-access layer reads and writes through, plus
//! an in-memory reference adapter that doubles as an instrumented test store.

mod memory;
mod stats;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::models::{Entity, Predicate};

pub use memory::InMemoryStore;
pub use stats::StoreStats;

// == Partition ==
/// One slice of a hash partitioning of the identifier key space.
///
/// For a fixed `count`, the partitions `0..count` are disjoint and together
/// cover every identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub count: usize,
}

impl Partition {
    /// Returns every partition of a `count`-way split.
    pub fn split(count: usize) -> Vec<Partition> {
        (0..count).map(|index| Partition { index, count }).collect()
    }

    /// Returns true if `key` hashes into this partition.
    pub fn contains<K: Hash>(&self, key: &K) -> bool {
        if self.count <= 1 {
            return true;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.count as u64) as usize == self.index
    }
}

// == Scan Request ==
/// A page request for an identifier-ordered range scan.
#[derive(Debug, Clone)]
pub struct ScanRequest<K> {
    /// Resume strictly after this key; `None` starts at the beginning
    pub after: Option<K>,
    /// Maximum rows to return; `None` returns the rest of the range
    pub limit: Option<usize>,
    /// Restrict the scan to one partition of the key space
    pub partition: Option<Partition>,
}

impl<K> ScanRequest<K> {
    /// Scan of the whole collection in one call.
    pub fn full() -> Self {
        Self {
            after: None,
            limit: None,
            partition: None,
        }
    }

    /// First page of `limit` rows.
    pub fn page(limit: usize) -> Self {
        Self {
            after: None,
            limit: Some(limit),
            partition: None,
        }
    }

    pub fn after(mut self, cursor: Option<K>) -> Self {
        self.after = cursor;
        self
    }

    pub fn in_partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }
}

// == Entity Store ==
/// Ordered storage for one entity collection.
///
/// Each call is atomic: a call dropped before it completes has no effect,
/// and a completed call is fully applied.
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    /// Point lookup by identifier.
    async fn get(&self, id: &T::Id) -> StoreResult<Option<T>>;

    /// Range scan ordered by identifier with a resumable cursor.
    async fn scan(&self, request: ScanRequest<T::Id>) -> StoreResult<Vec<T>>;

    /// Predicate-filtered scan, ordered by identifier.
    async fn filter(&self, predicate: &Predicate) -> StoreResult<Vec<T>>;

    /// Inserts a new record; fails on a duplicate identifier.
    async fn insert(&self, entity: T) -> StoreResult<()>;

    /// Replaces an existing record; fails if it no longer exists.
    async fn update(&self, entity: T) -> StoreResult<()>;

    /// Removes an existing record; fails if it no longer exists.
    async fn delete(&self, id: &T::Id) -> StoreResult<()>;

    /// Inserts many records in one round trip.
    async fn insert_batch(&self, entities: Vec<T>) -> StoreResult<()>;
}
