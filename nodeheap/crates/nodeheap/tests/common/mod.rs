//! Shared fixture for heap integration tests
//!
//! Every test gets its own heap; handles are rooted explicitly, so anything
//! a test does not root is garbage at the next collection.

#![allow(dead_code)]

use nodeheap::{GcConfig, Handle, Heap, NodeKind, Rooted};

/// Small cell budget so collections happen without huge workloads
pub const SMALL_CELLS: usize = 2_000;

/// Small vector budget (bytes)
pub const SMALL_VECTOR_BYTES: usize = 256 * 1024;

/// ============================================================================
/// HEAP FIXTURE
/// ============================================================================

pub struct HeapFixture {
    pub heap: Heap,
}

impl HeapFixture {
    pub fn with_defaults() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Heap whose budgets are small enough to collect often
    pub fn small() -> Self {
        Self::with_config(GcConfig {
            initial_cells: SMALL_CELLS,
            initial_vector_bytes: SMALL_VECTOR_BYTES,
            ..Default::default()
        })
    }

    /// Heap that cannot grow past its initial budgets
    pub fn bounded(cells: usize, vector_bytes: usize) -> Self {
        Self::with_config(GcConfig {
            initial_cells: cells,
            max_cells: cells,
            initial_vector_bytes: vector_bytes,
            max_vector_bytes: vector_bytes,
            ..Default::default()
        })
    }

    /// Heap that retypes reclaimed nodes, so stale handles are detectable
    pub fn debug() -> Self {
        Self::with_config(GcConfig {
            debug_checks: true,
            ..Default::default()
        })
    }

    pub fn with_config(config: GcConfig) -> Self {
        let heap = Heap::new(config).expect("heap creation should succeed");
        Self { heap }
    }

    /// Allocate and root an integer vector holding `values`
    pub fn rooted_ints(&mut self, values: &[i32]) -> (Handle, Rooted) {
        let v = self
            .heap
            .alloc_vector(NodeKind::Integer, values.len() as i64)
            .unwrap();
        let guard = self.heap.root(v).unwrap();
        for (i, &x) in values.iter().enumerate() {
            self.heap.set_integer_elt(v, i, x).unwrap();
        }
        (v, guard)
    }

    /// Build a pair list of `n` integer scalars 0..n, returning it rooted
    pub fn int_list(&mut self, n: usize) -> (Handle, Rooted) {
        let mut list = Handle::NIL;
        let guard = self.heap.root(list).unwrap();
        for i in (0..n).rev() {
            let x = self.heap.alloc_vector(NodeKind::Integer, 1).unwrap();
            self.heap.set_integer_elt(x, 0, i as i32).unwrap();
            let _x = self.heap.root(x).unwrap();
            list = self.heap.cons(x, list).unwrap();
            guard.set(list);
        }
        (list, guard)
    }

    /// Integer scalars along a pair list
    pub fn list_ints(&self, mut list: Handle) -> Vec<i32> {
        let mut out = Vec::new();
        while !list.is_nil() {
            let x = self.heap.car(list).unwrap();
            out.push(self.heap.integer_elt(x, 0).unwrap());
            list = self.heap.cdr(list).unwrap();
        }
        out
    }

    /// Full collection followed by a list integrity check
    pub fn full_gc(&mut self) {
        self.heap.gc_full(0).unwrap();
        assert_lists_consistent(&self.heap);
    }

    /// Scheduled collection followed by a list integrity check
    pub fn gc(&mut self) {
        self.heap.collect(0, 0).unwrap();
        assert_lists_consistent(&self.heap);
    }

    pub fn cells_in_use(&self) -> usize {
        self.heap.heap_stats().cells_in_use
    }

    pub fn generation(&self, h: Handle) -> u8 {
        self.heap.node_info(h).unwrap().generation
    }
}

/// ============================================================================
/// ASSERTIONS
/// ============================================================================

pub fn assert_lists_consistent(heap: &Heap) {
    if let Err(msg) = heap.verify_lists() {
        panic!("list invariant violated: {}", msg);
    }
}

/// Holds for large vectors, and for any node under debug checks
pub fn assert_reclaimed(heap: &Heap, h: Handle, what: &str) {
    assert!(!heap.is_valid(h), "{} should have been reclaimed", what);
}

pub fn assert_alive(heap: &Heap, h: Handle, what: &str) {
    assert!(heap.is_valid(h), "{} should still be alive", what);
}
