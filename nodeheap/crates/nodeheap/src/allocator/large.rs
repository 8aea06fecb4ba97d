//! Large Vectors - One independently allocated block per node
//!
//! Vectors whose payload exceeds the largest page class get their own
//! block, owned by the node body. The node itself sits in the arena and on
//! the LARGE class lists like any other node, so aging and the write
//! barrier need no special cases. Reclaiming a large node drops its block.

use super::LARGE_NODE_CLASS;
use crate::heap::lists::{snap, unsnap};
use crate::heap::Heap;
use crate::object::handle::bump_stamp;
use crate::object::{Body, Home, NodeId, NodeKind};
use crate::error::Result;
use nodeheap_util::VCELL_BYTES;

/// Header vcells a large node is charged beyond its payload
pub(crate) const LARGE_HEADER_VCELLS: usize = 5;

/// Largest payload, in vector cells, a single block may hold
pub(crate) fn max_large_vcells() -> usize {
    usize::MAX / VCELL_BYTES - LARGE_HEADER_VCELLS
}

/// Reserve a zeroed block of `vcells` vector cells
///
/// Returns `None` when the system allocator refuses.
pub(crate) fn alloc_large_block(vcells: usize) -> Option<Box<[u8]>> {
    let bytes = vcells.checked_mul(VCELL_BYTES)?;
    let mut block = Vec::new();
    block.try_reserve_exact(bytes).ok()?;
    block.resize(bytes, 0);
    Some(block.into_boxed_slice())
}

impl Heap {
    /// Put a freshly allocated block under a new LARGE node
    pub(crate) fn link_large_node(
        &mut self,
        kind: NodeKind,
        length: usize,
        block: Box<[u8]>,
    ) -> Result<NodeId> {
        let vcells = block.len() / VCELL_BYTES;
        let id = self.take_slot()?;
        let node = &mut self.nodes[id];
        node.stamp = bump_stamp(node.stamp);
        node.reset(
            kind,
            Body::Vector {
                length,
                large: Some(block),
            },
        );
        node.class = LARGE_NODE_CLASS as u8;
        node.home = Home::Large;
        snap(&mut self.nodes, id, self.classes[LARGE_NODE_CLASS].new);

        self.classes[LARGE_NODE_CLASS].alloc_count += 1;
        self.budget.nodes_in_use += 1;
        self.budget.large_valloc += vcells;
        Ok(id)
    }

    /// Drop every large node still on the New list after a trace
    pub(crate) fn release_large_free_vectors(&mut self) {
        let new = self.classes[LARGE_NODE_CLASS].new;
        let mut s = self.nodes[new].next;
        while s != new {
            let next = self.nodes[s].next;
            let vcells = match &self.nodes[s].body {
                Body::Vector {
                    large: Some(block), ..
                } => block.len() / VCELL_BYTES,
                _ => 0,
            };
            unsnap(&mut self.nodes, s);
            self.budget.large_valloc -= vcells;
            self.classes[LARGE_NODE_CLASS].alloc_count -= 1;
            self.vacate_slot(s);
            s = next;
        }
    }
}
