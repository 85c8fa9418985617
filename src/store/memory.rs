//! In-Memory Store Module
//!
//! Reference `EntityStore` backed by a `BTreeMap`, ordered by identifier.
//! Instrumented for tests: it counts traffic, can add per-call latency and
//! can simulate an outage.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::models::{Entity, Predicate};
use crate::store::{EntityStore, ScanRequest, StoreStats};

// == In-Memory Store ==
/// Identifier-ordered in-memory entity store.
#[derive(Debug)]
pub struct InMemoryStore<T: Entity> {
    /// Records keyed by identifier
    rows: RwLock<BTreeMap<T::Id, T>>,
    /// Traffic counters
    stats: Mutex<StoreStats>,
    /// Simulated round-trip latency applied to every call
    latency: Mutex<Duration>,
    /// When false every call fails with `StoreError::Unavailable`
    available: AtomicBool,
    /// Scans currently executing
    active_scans: AtomicUsize,
}

impl<T: Entity> InMemoryStore<T> {
    // == Constructor ==
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            stats: Mutex::new(StoreStats::new()),
            latency: Mutex::new(Duration::ZERO),
            available: AtomicBool::new(true),
            active_scans: AtomicUsize::new(0),
        }
    }

    /// Creates a store pre-populated with `entities`; later duplicates win.
    pub fn with_entities(entities: impl IntoIterator<Item = T>) -> Self {
        let rows = entities
            .into_iter()
            .map(|e| (e.id().clone(), e))
            .collect::<BTreeMap<_, _>>();
        Self {
            rows: RwLock::new(rows),
            ..Self::new()
        }
    }

    // == Instrumentation ==
    /// Returns a copy of the traffic counters.
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Zeroes the traffic counters.
    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = StoreStats::new();
        }
    }

    /// Adds `latency` before every call.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    /// Simulates an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns true if the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn record(&self, f: impl FnOnce(&mut StoreStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    /// Applies simulated latency, then checks availability.
    async fn round_trip(&self) -> StoreResult<()> {
        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        }
    }
}

impl<T: Entity> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks a running scan; decrements the counter on every exit path.
struct ScanGuard<'a>(&'a AtomicUsize);

impl<'a> ScanGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> (Self, usize) {
        let active = counter.fetch_add(1, Ordering::SeqCst) + 1;
        (Self(counter), active)
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for InMemoryStore<T> {
    async fn get(&self, id: &T::Id) -> StoreResult<Option<T>> {
        self.round_trip().await?;
        let found = self.rows.read().await.get(id).cloned();
        self.record(|s| s.record_lookup(found.is_some()));
        Ok(found)
    }

    async fn scan(&self, request: ScanRequest<T::Id>) -> StoreResult<Vec<T>> {
        let (_guard, active) = ScanGuard::enter(&self.active_scans);
        self.record(|s| s.observe_concurrent_scans(active));
        self.round_trip().await?;

        let rows = self.rows.read().await;
        let lower = match request.after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };
        let matching = rows
            .range((lower, Bound::Unbounded))
            .map(|(_, entity)| entity)
            .filter(|entity| request.partition.map_or(true, |p| p.contains(entity.id())));
        let page: Vec<T> = match request.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        };

        trace!(rows = page.len(), partition = ?request.partition, "scan page served");
        self.record(|s| s.record_scan(page.len()));
        Ok(page)
    }

    async fn filter(&self, predicate: &Predicate) -> StoreResult<Vec<T>> {
        self.round_trip().await?;
        let rows = self.rows.read().await;
        let mut matched = Vec::new();
        for entity in rows.values() {
            let record = serde_json::to_value(entity)?;
            if predicate.matches(&record) {
                matched.push(entity.clone());
            }
        }
        self.record(|s| s.record_filter(matched.len()));
        Ok(matched)
    }

    async fn insert(&self, entity: T) -> StoreResult<()> {
        self.round_trip().await?;
        let mut rows = self.rows.write().await;
        if rows.contains_key(entity.id()) {
            return Err(StoreError::Constraint(format!(
                "duplicate identifier {:?}",
                entity.id()
            )));
        }
        rows.insert(entity.id().clone(), entity);
        self.record(StoreStats::record_write);
        Ok(())
    }

    async fn update(&self, entity: T) -> StoreResult<()> {
        self.round_trip().await?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(entity.id()) {
            Some(slot) => {
                *slot = entity;
                self.record(StoreStats::record_write);
                Ok(())
            }
            None => Err(StoreError::Conflict(format!(
                "row {:?} no longer exists",
                entity.id()
            ))),
        }
    }

    async fn delete(&self, id: &T::Id) -> StoreResult<()> {
        self.round_trip().await?;
        let mut rows = self.rows.write().await;
        if rows.remove(id).is_none() {
            return Err(StoreError::Conflict(format!("row {:?} no longer exists", id)));
        }
        self.record(StoreStats::record_write);
        Ok(())
    }

    async fn insert_batch(&self, entities: Vec<T>) -> StoreResult<()> {
        self.round_trip().await?;
        let mut rows = self.rows.write().await;

        // Validate the whole batch before applying any of it
        let mut seen = std::collections::BTreeSet::new();
        for entity in &entities {
            if rows.contains_key(entity.id()) || !seen.insert(entity.id()) {
                return Err(StoreError::Constraint(format!(
                    "duplicate identifier {:?} in batch",
                    entity.id()
                )));
            }
        }

        for entity in entities {
            rows.insert(entity.id().clone(), entity);
        }
        self.record(StoreStats::record_batch_write);
        Ok(())
    }
}
