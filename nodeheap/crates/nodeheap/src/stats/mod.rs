//! Stats Module - Collector counters
//!
//! Counters are updated from inside the heap on every allocation, barrier
//! hit, collection and finalizer run. They are atomics so a snapshot can be
//! taken through a shared reference.
//!
//! Metrics:
//! - collections per level, pause time distribution
//! - allocations, write barrier hits
//! - pages returned to the system, finalizers run

pub mod histogram;
pub mod timer;

pub use histogram::Histogram;
pub use timer::GcTimer;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Collector statistics
pub struct GcStats {
    total_cycles: AtomicU64,
    /// Level-0 passes
    minor_cycles: AtomicU64,
    /// Passes covering some but not all old generations
    partial_cycles: AtomicU64,
    full_cycles: AtomicU64,
    pause_stats: Histogram,
    allocations: AtomicU64,
    barrier_hits: AtomicU64,
    pages_released: AtomicU64,
    finalizers_run: AtomicU64,
    start_time: Instant,
}

impl GcStats {
    pub fn new() -> Self {
        Self {
            total_cycles: AtomicU64::new(0),
            minor_cycles: AtomicU64::new(0),
            partial_cycles: AtomicU64::new(0),
            full_cycles: AtomicU64::new(0),
            pause_stats: Histogram::new(),
            allocations: AtomicU64::new(0),
            barrier_hits: AtomicU64::new(0),
            pages_released: AtomicU64::new(0),
            finalizers_run: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one collection pass at `level`
    pub fn record_collection(&self, level: usize, full: bool, pause: Duration) {
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        let counter = if full {
            &self.full_cycles
        } else if level == 0 {
            &self.minor_cycles
        } else {
            &self.partial_cycles
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.pause_stats
            .record(u64::try_from(pause.as_nanos()).unwrap_or(u64::MAX));
    }

    pub fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_barrier_hit(&self) {
        self.barrier_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_released(&self) {
        self.pages_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalizer_run(&self) {
        self.finalizers_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Pause time histogram, in nanoseconds
    pub fn pause_histogram(&self) -> &Histogram {
        &self.pause_stats
    }

    /// Snapshot of all counters
    pub fn summary(&self) -> GcSummary {
        GcSummary {
            total_cycles: self.total_cycles.load(Ordering::Relaxed),
            minor_cycles: self.minor_cycles.load(Ordering::Relaxed),
            partial_cycles: self.partial_cycles.load(Ordering::Relaxed),
            full_cycles: self.full_cycles.load(Ordering::Relaxed),
            avg_pause_ms: self.pause_stats.mean() as f64 / 1_000_000.0,
            max_pause_ms: self.pause_stats.max() as f64 / 1_000_000.0,
            p99_pause_ms: self.pause_stats.p99() as f64 / 1_000_000.0,
            allocations: self.allocations.load(Ordering::Relaxed),
            barrier_hits: self.barrier_hits.load(Ordering::Relaxed),
            pages_released: self.pages_released.load(Ordering::Relaxed),
            finalizers_run: self.finalizers_run.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.total_cycles,
            &self.minor_cycles,
            &self.partial_cycles,
            &self.full_cycles,
            &self.allocations,
            &self.barrier_hits,
            &self.pages_released,
            &self.finalizers_run,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.pause_stats.clear();
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcSummary {
    pub total_cycles: u64,
    pub minor_cycles: u64,
    pub partial_cycles: u64,
    pub full_cycles: u64,
    pub avg_pause_ms: f64,
    pub max_pause_ms: f64,
    /// Upper bucket edge of the 99th percentile
    pub p99_pause_ms: f64,
    pub allocations: u64,
    pub barrier_hits: u64,
    pub pages_released: u64,
    pub finalizers_run: u64,
    pub uptime_secs: u64,
}

impl crate::heap::Heap {
    /// Collector counters
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}
