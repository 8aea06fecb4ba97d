//! Generation Lists - Per-class circular node lists
//!
//! Each size class keeps its nodes on circular doubly linked lists anchored
//! by peg nodes that live in the arena like any other slot:
//!
//! ```text
//! New ─▶ allocated since last collection ─▶ Free ─▶ ... unused ... ─▶ New
//! Old[g]       survivors of generation g
//! OldToNew[g]  generation g nodes that may reference younger nodes
//! ```
//!
//! The Free cursor points into the New list: everything between the New peg
//! and Free was handed out since the last collection, everything from Free
//! back to the peg is available. `Free == New` means the class is exhausted.

use crate::object::{Node, NodeId, PageId};
use nodeheap_util::IndexVec;

/// Lists and counters of one size class
#[derive(Debug)]
pub(crate) struct ClassHeap {
    pub(crate) old: Vec<NodeId>,
    pub(crate) old_to_new: Vec<NodeId>,
    pub(crate) new: NodeId,
    pub(crate) free: NodeId,
    /// Nodes on `old[g]` plus `old_to_new[g]`
    pub(crate) old_count: Vec<usize>,
    /// Nodes owned by this class, free or not
    pub(crate) alloc_count: usize,
    /// Pages in allocation order; the newest is last
    pub(crate) pages: Vec<PageId>,
}

impl ClassHeap {
    pub(crate) fn new(nodes: &mut IndexVec<NodeId, Node>, class: u8, generations: usize) -> Self {
        let peg = |nodes: &mut IndexVec<NodeId, Node>| {
            let id = nodes.next_index();
            nodes.push(Node::peg(id, class))
        };
        let old = (0..generations).map(|_| peg(nodes)).collect();
        let old_to_new = (0..generations).map(|_| peg(nodes)).collect();
        let new = peg(nodes);
        Self {
            old,
            old_to_new,
            new,
            free: new,
            old_count: vec![0; generations],
            alloc_count: 0,
            pages: Vec::new(),
        }
    }

    pub(crate) fn has_free_node(&self) -> bool {
        self.free != self.new
    }

    pub(crate) fn total_old(&self) -> usize {
        self.old_count.iter().sum()
    }

    /// Every peg of the class
    pub(crate) fn pegs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.old
            .iter()
            .chain(self.old_to_new.iter())
            .copied()
            .chain(std::iter::once(self.new))
    }
}

/// Detach `s` from whatever list holds it
pub(crate) fn unsnap(nodes: &mut IndexVec<NodeId, Node>, s: NodeId) {
    let (next, prev) = (nodes[s].next, nodes[s].prev);
    nodes[prev].next = next;
    nodes[next].prev = prev;
}

/// Insert detached `s` just before `t`; with a peg as `t` this appends
pub(crate) fn snap(nodes: &mut IndexVec<NodeId, Node>, s: NodeId, t: NodeId) {
    let prev = nodes[t].prev;
    nodes[s].next = t;
    nodes[t].prev = s;
    nodes[prev].next = s;
    nodes[s].prev = prev;
}

/// Move `s` from its list to the end of the list anchored by `peg`
pub(crate) fn relink(nodes: &mut IndexVec<NodeId, Node>, s: NodeId, peg: NodeId) {
    unsnap(nodes, s);
    snap(nodes, s, peg);
}

pub(crate) fn is_empty(nodes: &IndexVec<NodeId, Node>, peg: NodeId) -> bool {
    nodes[peg].next == peg
}

/// Splice the whole list at `from` right after the `to` peg, leaving `from`
/// empty
pub(crate) fn bulk_move(nodes: &mut IndexVec<NodeId, Node>, from: NodeId, to: NodeId) {
    if is_empty(nodes, from) {
        return;
    }
    let first_old = nodes[from].next;
    let last_old = nodes[from].prev;
    let first_new = nodes[to].next;
    nodes[first_old].prev = to;
    nodes[to].next = first_old;
    nodes[first_new].prev = last_old;
    nodes[last_old].next = first_new;
    nodes[from].next = from;
    nodes[from].prev = from;
}

/// Members of the list at `peg`, in order
pub(crate) fn members(nodes: &IndexVec<NodeId, Node>, peg: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut s = nodes[peg].next;
    while s != peg {
        out.push(s);
        s = nodes[s].next;
    }
    out
}
