//! GC Allocation Tests - size classes, limits and allocation errors
//!
//! These tests verify that the allocator:
//! - places every request in the smallest class that fits
//! - initializes new vectors (nil, blank string, zeros)
//! - reports each kind of failure with its own error
//! - grows the vector budget for a large request when allowed to
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{assert_lists_consistent, HeapFixture};
use nodeheap::allocator::MAX_VECTOR_LENGTH;
use nodeheap::{Finalizer, Handle, HeapError, NodeKind};

const MB: usize = 1024 * 1024;

/// ============================================================================
/// SIZE CLASSES
/// ============================================================================

/// **Invariant verified:** payloads go to the smallest fitting class
#[test]
fn test_vectors_land_in_smallest_class() {
    let mut f = HeapFixture::with_defaults();
    let cases: [(NodeKind, i64, u8); 10] = [
        (NodeKind::Integer, 1, 1),
        (NodeKind::Integer, 2, 1),
        (NodeKind::Real, 2, 2),
        (NodeKind::Real, 3, 3),
        (NodeKind::Real, 5, 4),
        (NodeKind::Real, 7, 5),
        (NodeKind::Real, 16, 6),
        (NodeKind::Real, 17, 7),
        (NodeKind::Raw, 8, 1),
        (NodeKind::Complex, 8, 6),
    ];
    for (kind, len, class) in cases {
        let v = f.heap.alloc_vector(kind, len).unwrap();
        let info = f.heap.node_info(v).unwrap();
        assert_eq!(info.class, class, "{} of length {}", kind, len);
        assert_eq!(info.kind, kind);
        assert_eq!(f.heap.length(v).unwrap(), len as usize);
    }
}

#[test]
fn test_cells_use_class_zero() {
    let mut f = HeapFixture::with_defaults();
    let p = f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
    let env = f.heap.new_environment(Handle::NIL, Handle::NIL, Handle::NIL).unwrap();
    let prim = f.heap.mk_primitive(NodeKind::Builtin, 42).unwrap();
    for h in [p, env, prim] {
        assert_eq!(f.heap.node_info(h).unwrap().class, 0);
    }
    assert_eq!(f.heap.primitive_code(prim).unwrap(), 42);
}

#[test]
fn test_weak_refs_use_four_vcell_class() {
    let mut f = HeapFixture::with_defaults();
    let key = f.heap.new_environment(Handle::NIL, Handle::NIL, Handle::NIL).unwrap();
    let _k = f.heap.root(key).unwrap();
    let before = f.heap.heap_stats().small_vcells;
    let w = f
        .heap
        .new_weak_ref(key, Handle::NIL, Finalizer::None, false)
        .unwrap();
    assert_eq!(f.heap.node_info(w).unwrap().class, 3);
    assert_eq!(f.heap.heap_stats().small_vcells, before + 4);
}

/// ============================================================================
/// INITIALIZATION
/// ============================================================================

#[test]
fn test_new_vectors_are_initialized() {
    let mut f = HeapFixture::with_defaults();
    let list = f.heap.alloc_vector(NodeKind::List, 4).unwrap();
    let strs = f.heap.alloc_vector(NodeKind::Str, 4).unwrap();
    let reals = f.heap.alloc_vector(NodeKind::Real, 40).unwrap();
    for i in 0..4 {
        assert!(f.heap.vector_elt(list, i).unwrap().is_nil());
        assert_eq!(f.heap.string_elt(strs, i).unwrap(), f.heap.blank_string());
    }
    assert!(f.heap.vector_bytes(reals).unwrap().iter().all(|&b| b == 0));
}

#[test]
fn test_pair_and_language_vectors_are_lists() {
    let mut f = HeapFixture::with_defaults();
    let pairs = f.heap.alloc_vector(NodeKind::Pair, 3).unwrap();
    assert_eq!(f.heap.kind(pairs).unwrap(), NodeKind::Pair);
    let mut n = 0;
    let mut p = pairs;
    while !p.is_nil() {
        n += 1;
        p = f.heap.cdr(p).unwrap();
    }
    assert_eq!(n, 3);

    let call = f.heap.alloc_vector(NodeKind::Language, 2).unwrap();
    assert_eq!(f.heap.kind(call).unwrap(), NodeKind::Language);
    assert_eq!(f.heap.kind(f.heap.cdr(call).unwrap()).unwrap(), NodeKind::Pair);

    assert!(f.heap.alloc_vector(NodeKind::Language, 0).unwrap().is_nil());
    assert!(f.heap.alloc_vector(NodeKind::Nil, 5).unwrap().is_nil());
}

#[test]
fn test_zero_length_vectors() {
    let mut f = HeapFixture::with_defaults();
    for kind in [NodeKind::Integer, NodeKind::Real, NodeKind::Str, NodeKind::List] {
        let v = f.heap.alloc_vector(kind, 0).unwrap();
        assert!(!v.is_nil());
        assert_eq!(f.heap.length(v).unwrap(), 0);
    }
}

/// ============================================================================
/// ERRORS
/// ============================================================================

#[test]
fn test_negative_length_rejected() {
    let mut f = HeapFixture::with_defaults();
    assert!(matches!(
        f.heap.alloc_vector(NodeKind::Integer, -1),
        Err(HeapError::NegativeLength)
    ));
}

#[test]
fn test_overlong_vector_rejected() {
    let mut f = HeapFixture::with_defaults();
    let err = f
        .heap
        .alloc_vector(NodeKind::Integer, MAX_VECTOR_LENGTH as i64 + 1)
        .unwrap_err();
    assert!(matches!(err, HeapError::AllocationTooLarge { .. }));
    assert!(err.is_recoverable());
}

#[test]
fn test_non_vector_kind_rejected() {
    let mut f = HeapFixture::with_defaults();
    assert!(matches!(
        f.heap.alloc_vector(NodeKind::Environment, 1),
        Err(HeapError::InvalidArgument(_))
    ));
    assert!(f.heap.alloc_sexp(NodeKind::Real).is_err());
}

/// **Bug this finds:** allocation beyond a fixed cell budget
#[test]
fn test_cell_budget_exhaustion() {
    let mut f = HeapFixture::bounded(500, MB);
    let mut result = Ok(());
    for _ in 0..1000 {
        match f.heap.cons(Handle::NIL, Handle::NIL) {
            Ok(p) => {
                f.heap.push_root(p).unwrap();
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    assert!(matches!(result, Err(HeapError::OutOfNodes)));
    assert!(f.heap.heap_stats().cells_in_use <= 500);
    assert_lists_consistent(&f.heap);

    // dropping the roots makes room again
    let depth = f.heap.protect_depth();
    f.heap.pop_roots(depth).unwrap();
    f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
}

#[test]
fn test_vector_budget_exhaustion() {
    let mut f = HeapFixture::bounded(10_000, 6 * MB);
    let err = f.heap.alloc_vector(NodeKind::Raw, 10 * MB as i64).unwrap_err();
    assert!(matches!(err, HeapError::OutOfVectorSpace));
    assert_eq!(f.heap.heap_stats().large_vcells, 0);
}

/// ============================================================================
/// GROWTH
/// ============================================================================

/// A 10 MB request against a 6 MB budget grows the budget
#[test]
fn test_ten_megabyte_vector_grows_budget() {
    let mut f = HeapFixture::with_defaults();
    let before = f.heap.heap_stats().vcell_budget;
    let v = f.heap.alloc_vector(NodeKind::Raw, 10 * MB as i64).unwrap();
    let _g = f.heap.root(v).unwrap();

    let stats = f.heap.heap_stats();
    assert!(stats.vcell_budget > before);
    assert!(stats.vcell_budget >= stats.small_vcells + stats.large_vcells);
    assert_eq!(f.heap.node_info(v).unwrap().class, 7);
    assert_eq!(f.heap.vector_bytes(v).unwrap().len(), 10 * MB);

    f.heap.vector_bytes_mut(v).unwrap()[10 * MB - 1] = 0xff;
    f.full_gc();
    assert_eq!(f.heap.vector_bytes(v).unwrap()[10 * MB - 1], 0xff);
}

#[test]
fn test_limits_cannot_drop_below_budget() {
    let mut f = HeapFixture::with_defaults();
    let budget = f.heap.heap_stats().cell_budget;
    assert!(!f.heap.set_max_cells(budget - 1));
    assert!(f.heap.set_max_cells(1_000_000));
    assert_eq!(f.heap.max_cells(), 1_000_000);
    assert!(f.heap.set_max_vector_bytes(usize::MAX));
    assert_eq!(f.heap.max_vector_bytes(), usize::MAX);
}
