//! GC Heap Sizing Tests - budget controller, page release and reports
//!
//! The controller runs after full collections: budgets grow when live
//! data crowds them, shrink back toward their initial size when it does
//! not, and fully free pages go back to the system.

mod common;

use common::HeapFixture;
use nodeheap::{GcConfig, Handle, HeapError, NodeKind, SizingPolicy};

fn growable(cells: usize) -> HeapFixture {
    HeapFixture::with_config(GcConfig {
        initial_cells: cells,
        sizing: SizingPolicy {
            cell_grow_min: 500,
            ..Default::default()
        },
        ..Default::default()
    })
}

/// ============================================================================
/// CELL BUDGET
/// ============================================================================

#[test]
fn test_cell_budget_grows_with_live_data() {
    let mut f = growable(1_000);
    let keep = f.heap.alloc_vector(NodeKind::List, 800).unwrap();
    let _g = f.heap.root(keep).unwrap();
    for i in 0..800 {
        let p = f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
        f.heap.set_vector_elt(keep, i, p).unwrap();
    }

    f.full_gc();
    let budget = f.heap.heap_stats().cell_budget;
    // max(500, 5% of 1000)
    assert_eq!(budget, 1_500);
}

#[test]
fn test_cell_budget_shrinks_back_but_not_below_initial() {
    let mut f = growable(1_000);
    {
        let keep = f.heap.alloc_vector(NodeKind::List, 800).unwrap();
        let _g = f.heap.root(keep).unwrap();
        for i in 0..800 {
            let p = f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
            f.heap.set_vector_elt(keep, i, p).unwrap();
        }
        f.full_gc();
    }
    let grown = f.heap.heap_stats().cell_budget;
    assert!(grown > 1_000);

    f.full_gc();
    let shrunk = f.heap.heap_stats().cell_budget;
    assert!(shrunk < grown);
    for _ in 0..10 {
        f.full_gc();
    }
    assert_eq!(f.heap.heap_stats().cell_budget, 1_000);
}

#[test]
fn test_budget_respects_maximum() {
    let mut f = HeapFixture::with_config(GcConfig {
        initial_cells: 1_000,
        max_cells: 1_200,
        sizing: SizingPolicy {
            cell_grow_min: 500,
            ..Default::default()
        },
        ..Default::default()
    });
    let keep = f.heap.alloc_vector(NodeKind::List, 800).unwrap();
    let _g = f.heap.root(keep).unwrap();
    for i in 0..800 {
        let p = f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
        f.heap.set_vector_elt(keep, i, p).unwrap();
    }
    f.full_gc();
    assert_eq!(f.heap.heap_stats().cell_budget, 1_200);
}

/// **Bug this finds:** headroom between the budget and a maximum smaller
/// than one growth step left unused
#[test]
fn test_rooted_cells_fill_budget_up_to_maximum() {
    let mut f = HeapFixture::with_config(GcConfig {
        initial_cells: 1_000,
        max_cells: 1_200,
        sizing: SizingPolicy {
            cell_grow_min: 500,
            ..Default::default()
        },
        ..Default::default()
    });
    let mut rooted = 0;
    let err = loop {
        match f.heap.cons(Handle::NIL, Handle::NIL) {
            Ok(p) => {
                f.heap.push_root(p).unwrap();
                rooted += 1;
            }
            Err(e) => break e,
        }
    };
    assert!(matches!(err, HeapError::OutOfNodes), "{:?}", err);
    assert_eq!(f.heap.heap_stats().cell_budget, 1_200);
    assert!(rooted > 1_100, "stopped after {} rooted cells", rooted);
}

/// ============================================================================
/// VECTOR BUDGET
/// ============================================================================

#[test]
fn test_vector_budget_follows_live_vectors() {
    let mut f = HeapFixture::small();
    let initial = f.heap.heap_stats().vcell_budget;
    let big = f.heap.alloc_vector(NodeKind::Real, 100_000).unwrap();
    let guard = f.heap.root(big).unwrap();
    let grown = f.heap.heap_stats().vcell_budget;
    assert!(grown >= 100_000);

    drop(guard);
    for _ in 0..20 {
        f.full_gc();
    }
    let settled = f.heap.heap_stats().vcell_budget;
    assert!(settled < grown);
    assert_eq!(settled, initial);
}

/// ============================================================================
/// PAGES
/// ============================================================================

/// **Bug this finds:** empty pages never returned
#[test]
fn test_free_pages_are_released() {
    let mut f = HeapFixture::with_defaults();
    for _ in 0..10_000 {
        f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
    }
    let before = f.heap.heap_stats().total_pages();
    assert!(before >= 10_000 / 35);

    f.full_gc();
    let after = f.heap.heap_stats().total_pages();
    assert!(after < before, "{} pages before, {} after", before, after);
    assert!(f.heap.stats().summary().pages_released > 0);

    // released pages are replaced on demand
    for _ in 0..10_000 {
        f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
    }
    common::assert_lists_consistent(&f.heap);
}

/// ============================================================================
/// REPORTS
/// ============================================================================

#[test]
fn test_gc_report() {
    let mut f = HeapFixture::with_defaults();
    let v = f.heap.alloc_vector(NodeKind::Real, 1_000).unwrap();
    let _g = f.heap.root(v).unwrap();
    let report = f.heap.gc_report(false).unwrap();
    assert!(report.cells_used > 0);
    assert!(report.vcells_used >= 1_000);
    assert_eq!(report.cell_trigger, f.heap.heap_stats().cell_budget);
    assert!(report.cell_limit_mb.is_none());
    assert!(report.cells_max_used >= report.cells_used);

    let table = report.to_string();
    assert!(table.contains("Ncells"));
    assert!(table.contains("Vcells"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["cells_used"], report.cells_used);
}

#[test]
fn test_report_reset_max() {
    let mut f = HeapFixture::with_defaults();
    for _ in 0..5_000 {
        f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
    }
    f.heap.gc_full(0).unwrap();
    let report = f.heap.gc_report(true).unwrap();
    assert_eq!(report.cells_max_used, report.cells_used);
}

#[test]
fn test_memory_profile_counts_live_nodes() {
    let mut f = HeapFixture::with_defaults();
    let (_list, _g) = f.int_list(10);
    let profile = f.heap.memory_profile().unwrap();
    assert_eq!(profile[&NodeKind::Pair], 10);
    assert_eq!(profile[&NodeKind::Integer], 10);
    assert_eq!(profile[&NodeKind::Closure], 0);
    assert_eq!(profile.len(), NodeKind::ALLOCATABLE.len());
}

#[test]
fn test_stats_summary_tracks_levels() {
    let mut f = HeapFixture::with_defaults();
    f.gc();
    f.gc();
    f.heap.collect(0, 1).unwrap();
    let summary = f.heap.stats().summary();
    assert_eq!(summary.total_cycles, 3);
    assert_eq!(summary.full_cycles, 1);
    assert_eq!(summary.minor_cycles, 1);
    assert_eq!(summary.partial_cycles, 1);
    assert_eq!(f.heap.collection_counts(), &[1, 1, 1]);
}
