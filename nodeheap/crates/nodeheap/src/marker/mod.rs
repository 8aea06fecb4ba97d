//! Marker Module - Forwarding and tracing
//!
//! This module implements the reachability trace of a collection.
//!
//! Forwarding a node marks it, unlinks it from whatever list it is on and
//! pushes it on the forward stack. Processing pops nodes, files them on the
//! Old list of their (class, generation) and forwards their children. Nodes
//! that are never forwarded stay behind on New and become free.
//!
//! ```text
//!  roots ──forward──▶ [forward stack] ──process──▶ Old[class][gen]
//!                          ▲                            │
//!                          └────── forward children ────┘
//! ```
//!
//! Child enumeration is per kind, see [`ReferenceMap`]: the attribute list
//! first, then the kind's reference slots.

pub mod mark_queue;
pub mod roots;

pub use roots::{
    CallContext, ContextGuard, GlobalRoot, RootProvider, RootToken, Rooted,
};

use crate::heap::lists::snap;
use crate::heap::Heap;
use crate::object::{Body, Handle, NodeId, NodeKind, ReferenceMap};

impl Heap {
    /// Mark and enqueue `h` if it is an unmarked live node
    pub(crate) fn forward_node(&mut self, h: Handle) {
        let Some(id) = self.traceable(h) else {
            return;
        };
        let node = &self.nodes[id];
        if node.marked {
            return;
        }
        if node.kind == NodeKind::Free && !self.collector.inhibit_release {
            self.collector.record_bad_node(h.index(), node.prior_kind);
        }
        self.nodes[id].marked = true;
        crate::heap::lists::unsnap(&mut self.nodes, id);
        self.forward.push(&mut self.nodes, id);
    }

    /// Slot of `h` if it names a node the tracer may follow
    pub(crate) fn traceable(&self, h: Handle) -> Option<NodeId> {
        if h.is_nil() {
            return None;
        }
        let node = self.nodes.get(h.id())?;
        (node.stamp == h.stamp()).then_some(h.id())
    }

    /// Number of references `id` holds, attribute slot included
    pub(crate) fn child_count(&self, id: NodeId) -> usize {
        let node = &self.nodes[id];
        if node.kind == NodeKind::Free {
            return 0;
        }
        1 + match ReferenceMap::for_kind(node.kind) {
            ReferenceMap::Leaf => 0,
            ReferenceMap::Cell => 3,
            ReferenceMap::External => 2,
            ReferenceMap::Elements => node.body.vector_length().unwrap_or(0),
        }
    }

    /// Reference `i` of `id`; index 0 is the attribute list
    pub(crate) fn child(&self, id: NodeId, i: usize) -> Handle {
        let node = &self.nodes[id];
        if i == 0 {
            return node.attrib;
        }
        match &node.body {
            Body::Cell(slots) => slots[i - 1],
            Body::External { prot, tag, .. } => {
                if i == 1 {
                    *prot
                } else {
                    *tag
                }
            }
            Body::Vector { .. } => self.handle_elt(id, i - 1),
            _ => Handle::NIL,
        }
    }

    pub(crate) fn forward_children(&mut self, id: NodeId) {
        for i in 0..self.child_count(id) {
            let child = self.child(id, i);
            self.forward_node(child);
        }
    }

    /// Drain the forward stack
    pub(crate) fn process_nodes(&mut self) {
        while let Some(id) = self.forward.pop(&self.nodes) {
            let (class, gen) = {
                let node = &self.nodes[id];
                (node.class as usize, node.gen as usize)
            };
            let heap = &mut self.classes[class];
            snap(&mut self.nodes, id, heap.old[gen]);
            heap.old_count[gen] += 1;
            self.forward_children(id);
        }
    }
}
