//! Forward Stack - Worklist of marked but unscanned nodes
//!
//! A forwarded node has just been unlinked from its list, so its `next`
//! link is free to thread the worklist. The stack therefore needs no
//! storage of its own and never allocates during a collection.
//!
//! ```text
//! head ─▶ n3 ─next▶ n2 ─next▶ n1 ─next▶ INVALID
//! ```

use crate::object::{Node, NodeId};
use nodeheap_util::IndexVec;

/// LIFO worklist threaded through node `next` links
#[derive(Debug)]
pub(crate) struct ForwardStack {
    head: NodeId,
    /// Nodes pushed since creation
    pushed: usize,
}

impl ForwardStack {
    pub(crate) fn new() -> Self {
        Self {
            head: NodeId::INVALID,
            pushed: 0,
        }
    }

    /// Push a node that is on no list
    pub(crate) fn push(&mut self, nodes: &mut IndexVec<NodeId, Node>, id: NodeId) {
        nodes[id].next = self.head;
        self.head = id;
        self.pushed += 1;
    }

    pub(crate) fn pop(&mut self, nodes: &IndexVec<NodeId, Node>) -> Option<NodeId> {
        if !self.head.is_valid() {
            return None;
        }
        let id = self.head;
        self.head = nodes[id].next;
        Some(id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.head.is_valid()
    }

    pub(crate) fn pushed(&self) -> usize {
        self.pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo_order_through_links() {
        let mut nodes: IndexVec<NodeId, Node> = IndexVec::new();
        let a = nodes.push(Node::vacant());
        let b = nodes.push(Node::vacant());
        let mut stack = ForwardStack::new();
        assert!(stack.is_empty());

        stack.push(&mut nodes, a);
        stack.push(&mut nodes, b);

        assert_eq!(stack.pop(&nodes), Some(b));
        assert_eq!(stack.pop(&nodes), Some(a));
        assert_eq!(stack.pop(&nodes), None);
        assert_eq!(stack.pushed(), 2);
    }
}
