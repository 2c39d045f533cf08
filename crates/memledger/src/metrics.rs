//! Atomic counters for tracker observability.
//!
//! All counters use relaxed ordering. They are diagnostic only and never
//! used for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-tracker operation counters.
#[derive(Debug)]
pub struct TrackerMetrics {
    /// Successful tracked allocations (including zeroed).
    pub allocations: AtomicU64,
    /// Successful tracked resizes of a live pointer.
    pub resizes: AtomicU64,
    /// Successful tracked releases of a live pointer.
    pub releases: AtomicU64,
    /// Releases of null (no-ops).
    pub null_releases: AtomicU64,
    /// Operations forwarded untracked because tracking is disabled.
    pub passthrough_ops: AtomicU64,
    /// Total bytes requested by tracked allocations and resizes.
    pub bytes_requested: AtomicU64,
    /// Highest live byte total observed.
    pub peak_live_bytes: AtomicU64,
    /// Faults detected (fatal or returned).
    pub faults: AtomicU64,
}

impl TrackerMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            resizes: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            null_releases: AtomicU64::new(0),
            passthrough_ops: AtomicU64::new(0),
            bytes_requested: AtomicU64::new(0),
            peak_live_bytes: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub(crate) fn note_bytes(&self, requested: usize, live_bytes: usize) {
        self.bytes_requested
            .fetch_add(requested as u64, Ordering::Relaxed);
        self.peak_live_bytes
            .fetch_max(live_bytes as u64, Ordering::Relaxed);
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            resizes: Self::get(&self.resizes),
            releases: Self::get(&self.releases),
            null_releases: Self::get(&self.null_releases),
            passthrough_ops: Self::get(&self.passthrough_ops),
            bytes_requested: Self::get(&self.bytes_requested),
            peak_live_bytes: Self::get(&self.peak_live_bytes),
            faults: Self::get(&self.faults),
        }
    }
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub resizes: u64,
    pub releases: u64,
    pub null_releases: u64,
    pub passthrough_ops: u64,
    pub bytes_requested: u64,
    pub peak_live_bytes: u64,
    pub faults: u64,
}
