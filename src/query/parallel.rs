//! Parallel Scan
//!
//! Splits the identifier key space into disjoint hash partitions and runs one
//! chunked sub-scan per partition concurrently, then merges the results.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{RepoError, Result, StoreError};
use crate::models::Entity;
use crate::query::scan_chunked;
use crate::store::{EntityStore, Partition};

/// Scans every partition concurrently and merges them in identifier order.
///
/// At most `partitions` sub-scans are in flight. On cancellation or on the
/// first failing partition every outstanding sub-scan is aborted and no
/// partial result is returned.
pub(crate) async fn scan_parallel<T, S>(
    store: Arc<S>,
    partitions: NonZeroUsize,
    chunk_size: NonZeroUsize,
    cancel: &CancellationToken,
) -> Result<Vec<T>>
where
    T: Entity,
    S: EntityStore<T> + ?Sized + 'static,
{
    let count = partitions.get();
    let permits = Arc::new(Semaphore::new(count));
    let mut scans = JoinSet::new();

    for partition in Partition::split(count) {
        let store = Arc::clone(&store);
        let permits = Arc::clone(&permits);

        scans.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| RepoError::Cancelled("partition scheduler closed".to_string()))?;
            scan_chunked(store.as_ref(), chunk_size, Some(partition)).await
        });
    }

    let mut merged = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                scans.abort_all();
                warn!(partitions = count, "parallel scan cancelled, discarding partial results");
                return Err(RepoError::Cancelled("parallel scan cancelled".to_string()));
            }
            next = scans.join_next() => next,
        };

        match next {
            None => break,
            Some(Ok(Ok(rows))) => merged.extend(rows),
            Some(Ok(Err(err))) => {
                scans.abort_all();
                return Err(err);
            }
            Some(Err(join_err)) => {
                scans.abort_all();
                return Err(RepoError::Store(StoreError::Unavailable(format!(
                    "partition scan aborted: {}",
                    join_err
                ))));
            }
        }
    }

    merged.sort_by(|a, b| a.id().cmp(b.id()));
    debug!(partitions = count, rows = merged.len(), "parallel scan merged");
    Ok(merged)
}
