//! Chunked Scan
//!
//! Keyset pagination: pages ordered by identifier, each resuming strictly
//! after the last key of the previous page, until a short page ends the scan.

use std::num::NonZeroUsize;

use tracing::debug;

use crate::error::Result;
use crate::models::Entity;
use crate::store::{EntityStore, Partition, ScanRequest};

/// Reads the collection (or one partition of it) page by page.
///
/// Ordering by a unique key means the concatenated pages equal a full scan,
/// with no duplicates, when no rows move behind the cursor meanwhile.
pub(crate) async fn scan_chunked<T, S>(
    store: &S,
    chunk_size: NonZeroUsize,
    partition: Option<Partition>,
) -> Result<Vec<T>>
where
    T: Entity,
    S: EntityStore<T> + ?Sized,
{
    let chunk_size = chunk_size.get();
    let mut rows = Vec::new();
    let mut cursor: Option<T::Id> = None;
    let mut pages = 0usize;

    loop {
        let request = ScanRequest::page(chunk_size).after(cursor.take());
        let request = match partition {
            Some(partition) => request.in_partition(partition),
            None => request,
        };

        let page = store.scan(request).await?;
        let fetched = page.len();
        pages += 1;

        cursor = page.last().map(|entity| entity.id().clone());
        rows.extend(page);

        if fetched < chunk_size {
            break;
        }
    }

    debug!(
        pages,
        rows = rows.len(),
        chunk_size,
        partition = ?partition,
        "chunked scan complete"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Appointment {
        id: u64,
        slot: String,
    }

    impl Entity for Appointment {
        type Id = u64;

        fn id(&self) -> &u64 {
            &self.id
        }
    }

    fn store_of(n: u64) -> InMemoryStore<Appointment> {
        InMemoryStore::with_entities((1..=n).map(|id| Appointment {
            id,
            slot: format!("09:{:02}", id % 60),
        }))
    }

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_twenty_five_rows_in_pages_of_ten() {
        let store = store_of(25);
        let rows = scan_chunked(&store, size(10), None).await.unwrap();

        assert_eq!(rows.len(), 25);
        assert_eq!(store.stats().page_sizes, vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_on_empty_page() {
        let store = store_of(20);
        let rows = scan_chunked(&store, size(10), None).await.unwrap();

        assert_eq!(rows.len(), 20);
        assert_eq!(store.stats().page_sizes, vec![10, 10, 0]);
    }

    #[tokio::test]
    async fn test_chunk_of_one_returns_every_row() {
        let store = store_of(7);
        let rows = scan_chunked(&store, size(1), None).await.unwrap();

        assert_eq!(rows.iter().map(|a| a.id).collect::<Vec<_>>(), (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_single_page() {
        let store = store_of(7);
        let rows = scan_chunked(&store, size(100), None).await.unwrap();

        assert_eq!(rows.len(), 7);
        assert_eq!(store.stats().page_sizes, vec![7]);
    }

    #[tokio::test]
    async fn test_partitioned_pages_stay_in_partition() {
        let store = store_of(40);
        let mut covered = Vec::new();

        for partition in Partition::split(3) {
            let rows = scan_chunked(&store, size(4), Some(partition)).await.unwrap();
            assert!(rows.iter().all(|a| partition.contains(&a.id)));
            assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
            covered.extend(rows.into_iter().map(|a| a.id));
        }

        covered.sort_unstable();
        assert_eq!(covered, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let store = store_of(0);
        let rows = scan_chunked(&store, size(10), None).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = store_of(5);
        store.set_available(false);
        assert!(scan_chunked(&store, size(2), None).await.is_err());
    }
}
