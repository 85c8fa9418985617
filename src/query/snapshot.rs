//! Snapshot (memory-mapped) reads
//!
//! The whole collection loaded once into an immutable, shareable slice.
//! Writes to the store do not touch a loaded snapshot; readers accept that
//! stale window until the snapshot is refreshed.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;

// == Snapshot ==
/// Immutable, cheaply clonable view of a collection at load time.
#[derive(Debug)]
pub struct Snapshot<T> {
    rows: Arc<[T]>,
    loaded_at: DateTime<Utc>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            loaded_at: self.loaded_at,
        }
    }
}

impl<T> Snapshot<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self {
            rows: rows.into(),
            loaded_at: Utc::now(),
        }
    }

    /// When the rows were read from the store.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Returns true if both handles share the same loaded rows.
    pub fn same_as(&self, other: &Snapshot<T>) -> bool {
        Arc::ptr_eq(&self.rows, &other.rows)
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.rows
    }
}

// == Snapshot Cell ==
/// Holds the current snapshot of one collection, loading it on first use.
///
/// Concurrent first readers wait for a single load.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    slot: Mutex<Option<Snapshot<T>>>,
}

impl<T> SnapshotCell<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Returns the current snapshot, loading it with `load` if there is none.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Snapshot<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(snapshot) = slot.as_ref() {
            return Ok(snapshot.clone());
        }

        let snapshot = Snapshot::new(load().await?);
        info!(rows = snapshot.len(), "snapshot loaded");
        *slot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Replaces the current snapshot with a fresh load.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh<F, Fut>(&self, load: F) -> Result<Snapshot<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let mut slot = self.slot.lock().await;
        let snapshot = Snapshot::new(load().await?);
        info!(rows = snapshot.len(), "snapshot refreshed");
        *slot = Some(snapshot.clone());
        Ok(snapshot)
    }
}

impl<T> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
