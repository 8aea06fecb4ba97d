//! Write Barrier - Old-to-new bookkeeping and node aging
//!
//! Minor collections do not scan old generations. Any store that makes an
//! older node point at a younger one must therefore put the older node on
//! its class's OldToNew list for its generation, where the next collection
//! of a younger generation finds it.
//!
//! Ordering used by the barrier: `x` is older than `y` when `x` is marked
//! and `y` either is not, or sits in a lower generation. Nil counts as
//! marked and oldest, so storing nil never triggers the barrier.
//!
//! Aging is the inverse operation at collection time: the children of an
//! OldToNew node are pulled up into the node's generation so the node can
//! go back to its ordinary Old list.

use super::lists::{relink, snap, unsnap};
use super::Heap;
use crate::marker::mark_queue::ForwardStack;
use crate::object::{Handle, NodeId};

impl Heap {
    /// True if `x` is in an older generation than `y`
    pub(crate) fn node_is_older(&self, x: NodeId, y: Handle) -> bool {
        let xn = &self.nodes[x];
        if !xn.marked {
            return false;
        }
        match self.traceable(y) {
            None => false,
            Some(y) => {
                let yn = &self.nodes[y];
                !yn.marked || xn.gen > yn.gen
            }
        }
    }

    /// Barrier check, run before every pointer store of `y` into `x`
    pub(crate) fn check_old_to_new(&mut self, x: NodeId, y: Handle) {
        if self.node_is_older(x, y) {
            self.old_to_new(x);
        }
    }

    fn old_to_new(&mut self, x: NodeId) {
        let (class, gen) = (self.nodes[x].class as usize, self.nodes[x].gen as usize);
        relink(&mut self.nodes, x, self.classes[class].old_to_new[gen]);
        self.stats.record_barrier_hit();
    }

    /// True if `id` is younger than generation `gen`
    fn gen_is_younger(&self, id: NodeId, gen: u8) -> bool {
        let node = &self.nodes[id];
        !node.marked || node.gen < gen
    }

    fn age_node(&mut self, pending: &mut ForwardStack, h: Handle, gen: u8) {
        let Some(id) = self.traceable(h) else {
            return;
        };
        if !self.gen_is_younger(id, gen) {
            return;
        }
        let node = &mut self.nodes[id];
        if node.marked {
            let (class, old_gen) = (node.class as usize, node.gen as usize);
            self.classes[class].old_count[old_gen] -= 1;
        } else {
            node.marked = true;
        }
        self.nodes[id].gen = gen;
        unsnap(&mut self.nodes, id);
        pending.push(&mut self.nodes, id);
    }

    /// Move `h` and everything younger reachable from it into `gen`
    pub(crate) fn age_node_and_children(&mut self, h: Handle, gen: u8) {
        let mut pending = ForwardStack::new();
        self.age_node(&mut pending, h, gen);
        while let Some(id) = pending.pop(&self.nodes) {
            debug_assert_eq!(self.nodes[id].gen, gen, "aging into the wrong generation");
            let class = self.nodes[id].class as usize;
            snap(&mut self.nodes, id, self.classes[class].old[gen as usize]);
            self.classes[class].old_count[gen as usize] += 1;
            for i in 0..self.child_count(id) {
                let child = self.child(id, i);
                self.age_node(&mut pending, child, gen);
            }
        }
    }

    /// Age the children of every OldToNew node of `gen` and return the
    /// nodes to their Old list
    pub(crate) fn age_old_to_new(&mut self, gen: usize) {
        for class in 0..self.classes.len() {
            let peg = self.classes[class].old_to_new[gen];
            let mut s = self.nodes[peg].next;
            while s != peg {
                let next = self.nodes[s].next;
                for i in 0..self.child_count(s) {
                    let child = self.child(s, i);
                    self.age_node_and_children(child, gen as u8);
                }
                debug_assert_eq!(self.nodes[s].gen as usize, gen);
                relink(&mut self.nodes, s, self.classes[class].old[gen]);
                s = next;
            }
        }
    }
}
