//! GC Property Tests - random graphs against a reachability model
//!
//! A test keeps its own copy of every pair's car/cdr edges and its root
//! set. After any sequence of stores and collections, every pair the
//! model can reach must still exist with exactly the modeled edges; with
//! debug checks on, every pair it cannot reach must be gone.

mod common;

use common::{assert_lists_consistent, HeapFixture};
use nodeheap::{GcConfig, Handle, Heap};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use std::collections::HashSet;

/// Nodes per generated graph
const NODES: usize = 24;

#[derive(Debug, Clone)]
enum Op {
    Alloc,
    SetCar(u8, u8),
    SetCdr(u8, u8),
    ClearCar(u8),
    Root(u8),
    Unroot,
    Collect(u8),
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        let a = u8::arbitrary(g);
        let b = u8::arbitrary(g);
        match u8::arbitrary(g) % 10 {
            0 | 1 => Op::Alloc,
            2 | 3 => Op::SetCar(a, b),
            4 => Op::SetCdr(a, b),
            5 => Op::ClearCar(a),
            6 => Op::Root(a),
            7 => Op::Unroot,
            _ => Op::Collect(a),
        }
    }
}

/// Model of the pair graph
#[derive(Default)]
struct Model {
    nodes: Vec<Handle>,
    car: Vec<Option<usize>>,
    cdr: Vec<Option<usize>>,
    /// Protect stack, as node indices
    roots: Vec<usize>,
}

impl Model {
    fn reachable(&self) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut pending: Vec<usize> = self.roots.clone();
        while let Some(i) = pending.pop() {
            if seen.insert(i) {
                pending.extend(self.car[i]);
                pending.extend(self.cdr[i]);
            }
        }
        seen
    }

    /// Pick a node the heap still holds
    fn pick(&self, x: u8) -> Option<usize> {
        let live = self.reachable();
        let mut live: Vec<usize> = live.into_iter().collect();
        live.sort_unstable();
        if live.is_empty() {
            None
        } else {
            Some(live[x as usize % live.len()])
        }
    }

    fn handle(&self, i: Option<usize>) -> Handle {
        i.map_or(Handle::NIL, |i| self.nodes[i])
    }

    fn check(&self, heap: &Heap) -> bool {
        for i in self.reachable() {
            let h = self.nodes[i];
            if heap.car(h).ok() != Some(self.handle(self.car[i]))
                || heap.cdr(h).ok() != Some(self.handle(self.cdr[i]))
            {
                return false;
            }
        }
        true
    }
}

/// Apply `ops`, checking the model after every collection
fn run(f: &mut HeapFixture, ops: &[Op]) -> bool {
    let mut m = Model::default();
    let base_depth = f.heap.protect_depth();
    for op in ops {
        match *op {
            Op::Alloc => {
                if m.nodes.len() >= NODES {
                    continue;
                }
                // new pairs start out rooted so they can be linked in
                let h = f.heap.cons(Handle::NIL, Handle::NIL).unwrap();
                f.heap.push_root(h).unwrap();
                m.nodes.push(h);
                m.car.push(None);
                m.cdr.push(None);
                m.roots.push(m.nodes.len() - 1);
            }
            Op::SetCar(a, b) | Op::SetCdr(a, b) => {
                let (Some(x), Some(y)) = (m.pick(a), m.pick(b)) else {
                    continue;
                };
                if matches!(op, Op::SetCar(..)) {
                    f.heap.set_car(m.nodes[x], m.nodes[y]).unwrap();
                    m.car[x] = Some(y);
                } else {
                    f.heap.set_cdr(m.nodes[x], m.nodes[y]).unwrap();
                    m.cdr[x] = Some(y);
                }
            }
            Op::ClearCar(a) => {
                if let Some(x) = m.pick(a) {
                    f.heap.set_car(m.nodes[x], Handle::NIL).unwrap();
                    m.car[x] = None;
                }
            }
            Op::Root(a) => {
                if let Some(x) = m.pick(a) {
                    f.heap.push_root(m.nodes[x]).unwrap();
                    m.roots.push(x);
                }
            }
            Op::Unroot => {
                if m.roots.pop().is_some() {
                    f.heap.pop_roots(1).unwrap();
                }
            }
            Op::Collect(level) => {
                f.heap.collect(0, level as usize % 3).unwrap();
                assert_lists_consistent(&f.heap);
                if !m.check(&f.heap) {
                    return false;
                }
            }
        }
    }
    assert_eq!(f.heap.protect_depth(), base_depth + m.roots.len());

    f.heap.gc_full(0).unwrap();
    if !m.check(&f.heap) {
        return false;
    }
    if f.heap.config().debug_checks {
        let live = m.reachable();
        for (i, &h) in m.nodes.iter().enumerate() {
            if live.contains(&i) != f.heap.is_valid(h) {
                return false;
            }
        }
    }
    true
}

/// Minor, partial and full collections all preserve the modeled graph
#[quickcheck]
fn prop_generational_collections_preserve_reachable(ops: Vec<Op>) -> bool {
    let mut f = HeapFixture::with_defaults();
    run(&mut f, &ops)
}

/// Exactly the modeled-reachable pairs survive
#[quickcheck]
fn prop_debug_collections_reclaim_exactly_unreachable(ops: Vec<Op>) -> bool {
    let mut f = HeapFixture::debug();
    run(&mut f, &ops)
}

/// Collecting on every allocation changes nothing observable
#[quickcheck]
fn prop_torture_preserves_reachable(ops: Vec<Op>) -> bool {
    let mut f = HeapFixture::with_config(GcConfig {
        torture_gap: 1,
        ..Default::default()
    });
    run(&mut f, &ops)
}

#[test]
fn test_long_chain_survives_minor_collections() {
    let mut f = HeapFixture::with_defaults();
    let (list, _g) = f.int_list(200);
    for _ in 0..30 {
        f.gc();
    }
    assert_eq!(f.list_ints(list), (0..200).collect::<Vec<_>>());
}

/// Seeded random stores into a rooted list vector, interleaved with
/// collections at random levels
#[test]
fn test_seeded_random_workload() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use nodeheap::NodeKind;

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut f = HeapFixture::small();
    let slots = 128;
    let table = f.heap.alloc_vector(NodeKind::List, slots as i64).unwrap();
    let _g = f.heap.root(table).unwrap();
    let mut expected = vec![None; slots];

    for step in 0..20_000 {
        let slot = rng.gen_range(0..slots);
        match rng.gen_range(0..4) {
            0 => {
                f.heap.set_vector_elt(table, slot, Handle::NIL).unwrap();
                expected[slot] = None;
            }
            _ => {
                let len = rng.gen_range(1..40);
                let v = f.heap.alloc_vector(NodeKind::Integer, len).unwrap();
                f.heap.set_integer_elt(v, 0, step).unwrap();
                f.heap.set_vector_elt(table, slot, v).unwrap();
                expected[slot] = Some(step);
            }
        }
        if rng.gen_ratio(1, 500) {
            f.heap.collect(0, rng.gen_range(0..3)).unwrap();
        }
    }

    f.full_gc();
    for (slot, want) in expected.iter().enumerate() {
        let v = f.heap.vector_elt(table, slot).unwrap();
        match want {
            None => assert!(v.is_nil()),
            Some(step) => assert_eq!(f.heap.integer_elt(v, 0).unwrap(), *step),
        }
    }
}
