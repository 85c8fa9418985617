//! Entity Repo - generic data-access layer with pluggable read strategies
//!
//! One repository contract per entity collection, served by standard,
//! chunked, parallel, streaming or memory-mapped reads, with an optional
//! read-through caching decorator (TTL expiry, LRU eviction, single-flight
//! misses and write-triggered invalidation).

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod repository;
pub mod store;
pub mod tasks;

pub use cache::{CacheBackend, MemoryCache};
pub use config::{CacheOptions, Config, QueryOptions, QueryStrategy};
pub use error::{CacheError, RepoError, Result, StoreError};
pub use models::{Entity, Predicate};
pub use query::{EntityStream, QueryResult, Snapshot};
pub use repository::{CachedRepository, GenericRepository, Repository};
pub use store::{EntityStore, InMemoryStore};
pub use tasks::spawn_cleanup_task;
