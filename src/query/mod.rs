//! Query Strategy Engine
//!
//! Implements each read strategy against an [`EntityStore`]:
//!
//! | Strategy | Memory | Store traffic |
//! |---|---|---|
//! | Standard | whole collection | one scan |
//! | Chunked | whole collection | one scan per page |
//! | Parallel | whole collection | one chunked scan per partition, concurrently |
//! | Streaming | `buffer_size` unread rows + one page | one scan per page, on demand |
//! | MemoryMapped | one shared snapshot | one scan per load |
//!
//! Chunked and Parallel scans are consistent only when no rows are inserted
//! or deleted behind the cursor while they run; such rows may be missed.

mod chunked;
mod parallel;
mod snapshot;
mod streaming;


use std::future::Future;
use std::time::Duration;

use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{RepoError, Result};
use crate::models::Entity;
use crate::store::{EntityStore, ScanRequest};

pub(crate) use chunked::scan_chunked;
pub(crate) use parallel::scan_parallel;
pub use snapshot::{Snapshot, SnapshotCell};
pub use streaming::EntityStream;

// == Query Result ==
/// Outcome of a configurable read, shaped by the strategy that produced it.
#[derive(Debug)]
pub enum QueryResult<T: Entity> {
    /// Fully materialized rows (Standard, Chunked, Parallel)
    Materialized(Vec<T>),
    /// Lazy single-pass sequence (Streaming)
    Streaming(EntityStream<T>),
    /// Shared immutable snapshot (MemoryMapped)
    Snapshot(Snapshot<T>),
}

impl<T: Entity> QueryResult<T> {
    /// Drains the result into a vector, whatever its shape.
    pub async fn into_vec(self) -> Result<Vec<T>> {
        match self {
            QueryResult::Materialized(rows) => Ok(rows),
            QueryResult::Streaming(stream) => stream.try_collect().await,
            QueryResult::Snapshot(snapshot) => Ok(snapshot.to_vec()),
        }
    }
}

// == Standard ==
/// Single unbounded fetch of the whole collection.
pub(crate) async fn fetch_all<T, S>(store: &S) -> Result<Vec<T>>
where
    T: Entity,
    S: EntityStore<T> + ?Sized,
{
    Ok(store.scan(ScanRequest::full()).await?)
}

// == Deadline ==
/// Runs `operation` until it completes, `cancel` fires or `timeout` elapses.
///
/// The operation future is dropped on cancellation or timeout, which stops
/// it at its next await point.
pub(crate) async fn with_deadline<V, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    operation: F,
) -> Result<V>
where
    F: Future<Output = Result<V>>,
{
    if cancel.is_cancelled() {
        return Err(RepoError::Cancelled("cancelled before start".to_string()));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepoError::Cancelled("cancelled by caller".to_string())),
        outcome = tokio::time::timeout(timeout, operation) => match outcome {
            Ok(result) => result,
            Err(_) => Err(RepoError::Cancelled(format!("timed out after {:?}", timeout))),
        },
    }
}
