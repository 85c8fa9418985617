//! Store Statistics Module
//!
//! Call and row counters kept by the in-memory store, used to observe how a
//! read strategy actually touched storage.

use serde::Serialize;

// == Store Stats ==
/// Counters describing the traffic a store has served.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Point lookups served
    pub point_lookups: u64,
    /// Range scan calls served
    pub scans: u64,
    /// Predicate-filtered scans served
    pub filters: u64,
    /// Single-record writes (insert, update, delete) applied
    pub writes: u64,
    /// Batch insert calls applied
    pub batch_writes: u64,
    /// Total rows returned by reads
    pub rows_read: u64,
    /// Row count of every scan page, in call order
    pub page_sizes: Vec<usize>,
    /// Highest number of scans observed running at once
    pub peak_concurrent_scans: usize,
}

impl StoreStats {
    // == Constructor ==
    /// Creates a new StoreStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Scan ==
    /// Records a scan page of `rows` rows.
    pub fn record_scan(&mut self, rows: usize) {
        self.scans += 1;
        self.rows_read += rows as u64;
        self.page_sizes.push(rows);
    }

    // == Record Lookup ==
    /// Records a point lookup.
    pub fn record_lookup(&mut self, found: bool) {
        self.point_lookups += 1;
        if found {
            self.rows_read += 1;
        }
    }

    // == Record Filter ==
    /// Records a filtered scan returning `rows` rows.
    pub fn record_filter(&mut self, rows: usize) {
        self.filters += 1;
        self.rows_read += rows as u64;
    }

    /// Records a single-record write.
    pub fn record_write(&mut self) {
        self.writes += 1;
    }

    /// Records a batch insert.
    pub fn record_batch_write(&mut self) {
        self.batch_writes += 1;
    }

    /// Raises the concurrency high-water mark.
    pub fn observe_concurrent_scans(&mut self, active: usize) {
        self.peak_concurrent_scans = self.peak_concurrent_scans.max(active);
    }

    /// Total number of read calls of any kind.
    pub fn total_reads(&self) -> u64 {
        self.point_lookups + self.scans + self.filters
    }
}
