//! Debug Utilities - list integrity checks
//!
//! Walks every class list and checks the invariants the collector relies on:
//! links are symmetric, nodes sit on the list of their own class, Old and
//! OldToNew nodes are marked and in the list's generation, Old counts match
//! the list contents and page-backed classes account for every node.

use crate::allocator::NUM_SMALL_NODE_CLASSES;
use crate::heap::lists::members;
use crate::heap::Heap;
use crate::object::{NodeId, NodeKind};
use serde::Serialize;

/// Per-class list sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassCounts {
    pub class: usize,
    /// Allocated nodes on New (before the Free cursor)
    pub new_allocated: usize,
    /// Free nodes on New (from the Free cursor on)
    pub new_free: usize,
    pub old: Vec<usize>,
    pub old_to_new: Vec<usize>,
}

impl Heap {
    /// Sizes of every class list
    pub fn node_counts(&self) -> Vec<ClassCounts> {
        self.classes
            .iter()
            .enumerate()
            .map(|(class, heap)| {
                let new = members(&self.nodes, heap.new);
                let split = new.iter().position(|&id| id == heap.free).unwrap_or(new.len());
                ClassCounts {
                    class,
                    new_allocated: split,
                    new_free: new.len() - split,
                    old: heap.old.iter().map(|&p| members(&self.nodes, p).len()).collect(),
                    old_to_new: heap
                        .old_to_new
                        .iter()
                        .map(|&p| members(&self.nodes, p).len())
                        .collect(),
                }
            })
            .collect()
    }

    /// Check list invariants, returning the first violation found
    pub fn verify_lists(&self) -> std::result::Result<(), String> {
        for (class, heap) in self.classes.iter().enumerate() {
            let mut total = 0;
            for peg in heap.pegs() {
                self.verify_ring(class, peg)?;
            }

            let new = members(&self.nodes, heap.new);
            for &id in &new {
                if self.nodes[id].marked {
                    return Err(format!("class {}: marked node {:?} on New", class, id));
                }
            }
            if class < NUM_SMALL_NODE_CLASSES
                && heap.free != heap.new
                && !new.contains(&heap.free)
            {
                return Err(format!("class {}: Free cursor is not on New", class));
            }
            total += new.len();

            for (gen, (&old, &o2n)) in heap.old.iter().zip(&heap.old_to_new).enumerate() {
                let mut count = 0;
                for peg in [old, o2n] {
                    for id in members(&self.nodes, peg) {
                        let node = &self.nodes[id];
                        if !node.marked || node.gen as usize != gen {
                            return Err(format!(
                                "class {}: node {:?} on generation {} list is marked={} gen={}",
                                class, id, gen, node.marked, node.gen
                            ));
                        }
                        count += 1;
                    }
                }
                if count != heap.old_count[gen] {
                    return Err(format!(
                        "class {}: generation {} holds {} nodes, count says {}",
                        class, gen, count, heap.old_count[gen]
                    ));
                }
                total += count;
            }

            if class < NUM_SMALL_NODE_CLASSES && total != heap.alloc_count {
                return Err(format!(
                    "class {}: lists hold {} nodes, {} allocated from pages",
                    class, total, heap.alloc_count
                ));
            }
        }
        Ok(())
    }

    fn verify_ring(&self, class: usize, peg: NodeId) -> std::result::Result<(), String> {
        let mut s = peg;
        loop {
            let next = self.nodes[s].next;
            if self.nodes[next].prev != s {
                return Err(format!("class {}: broken link after {:?}", class, s));
            }
            if next == peg {
                return Ok(());
            }
            let node = &self.nodes[next];
            if node.class as usize != class || matches!(node.kind, NodeKind::Peg | NodeKind::Vacant) {
                return Err(format!(
                    "class {}: foreign node {:?} ({}, class {})",
                    class, next, node.kind, node.class
                ));
            }
            s = next;
        }
    }
}
