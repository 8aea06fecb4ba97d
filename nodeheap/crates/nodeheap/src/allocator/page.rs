//! Page Management - Fixed-size pages for the small size classes
//!
//! A page is one fixed-size block subdivided into same-class nodes. The
//! node headers live in the heap arena; the page owns the vector payload
//! bytes of its nodes, one `stride`-sized slice per slot.
//!
//! ```text
//! Page (class 3, 27 slots, stride 32 bytes)
//! ┌────────┬────────┬────────┬─────┬────────┐
//! │ slot 0 │ slot 1 │ slot 2 │ ... │ slot26 │   payload bytes
//! └────────┴────────┴────────┴─────┴────────┘
//!     ▲        ▲        ▲
//!  NodeId   NodeId   NodeId                      arena headers
//! ```
//!
//! Pages come from the system allocator with fallible reservation and go
//! back as a whole once no node on them is marked.

use super::{NODE_CLASS_VCELLS, NUM_SMALL_NODE_CLASSES};
use crate::error::{HeapError, Result};
use crate::heap::lists::{snap, unsnap};
use crate::heap::Heap;
use crate::object::handle::bump_stamp;
use crate::object::{Body, Home, Node, NodeId, NodeKind, PageId};
use nodeheap_util::VCELL_BYTES;

/// One page of a small class
pub(crate) struct Page {
    pub(crate) class: u8,
    /// Arena slots carved out of this page, in address order
    pub(crate) slots: Vec<NodeId>,
    stride: usize,
    data: Box<[u8]>,
}

impl Page {
    /// Reserve the payload block for `count` nodes of `class`
    ///
    /// Returns `None` when the system allocator refuses.
    fn allocate(class: usize, count: usize) -> Option<Self> {
        let stride = NODE_CLASS_VCELLS[class] * VCELL_BYTES;
        let bytes = stride * count;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes).ok()?;
        data.resize(bytes, 0);

        let mut slots = Vec::new();
        slots.try_reserve_exact(count).ok()?;

        Some(Page {
            class: class as u8,
            slots,
            stride,
            data: data.into_boxed_slice(),
        })
    }

    pub(crate) fn payload(&self, slot: u32) -> &[u8] {
        let start = slot as usize * self.stride;
        &self.data[start..start + self.stride]
    }

    pub(crate) fn payload_mut(&mut self, slot: u32) -> &mut [u8] {
        let start = slot as usize * self.stride;
        &mut self.data[start..start + self.stride]
    }
}

impl Heap {
    /// Add a page to `class` and thread its nodes onto the New list
    ///
    /// On allocation failure runs one full collection; if that freed a node
    /// of the class nothing more is needed, otherwise the page allocation is
    /// retried once.
    pub(crate) fn get_new_page(&mut self, class: usize) -> Result<()> {
        if self.try_add_page(class) {
            return Ok(());
        }
        log::debug!("page allocation for class {} failed, collecting", class);
        self.gc_full(0)?;
        if self.classes[class].has_free_node() {
            return Ok(());
        }
        if self.try_add_page(class) {
            return Ok(());
        }
        crate::logging::log_allocation_failure(class, self.layout.page_bytes);
        Err(HeapError::OutOfMemory {
            requested: self.layout.page_bytes,
        })
    }

    fn try_add_page(&mut self, class: usize) -> bool {
        let count = self.layout.nodes_per_page(class);
        let Some(mut page) = Page::allocate(class, count) else {
            return false;
        };
        let fresh_slots = count.saturating_sub(self.vacant.len());
        if self.nodes.try_reserve(fresh_slots).is_err() {
            return false;
        }

        let page_id = match self.vacant_pages.pop() {
            Some(id) => id,
            None => self.pages.push(None),
        };

        let mut base = self.classes[class].new;
        for slot in 0..count {
            let id = match self.vacant.pop() {
                Some(id) => id,
                None => self.nodes.push(Node::vacant()),
            };
            let node = &mut self.nodes[id];
            node.kind = NodeKind::Fresh;
            node.prior_kind = NodeKind::Fresh;
            node.class = class as u8;
            node.marked = false;
            node.gen = 0;
            node.home = Home::Page {
                page: page_id,
                slot: slot as u32,
            };
            node.body = Body::Empty;
            snap(&mut self.nodes, id, base);
            base = id;
            page.slots.push(id);
        }

        let heap = &mut self.classes[class];
        heap.alloc_count += count;
        heap.free = base;
        heap.pages.push(page_id);
        self.pages[page_id] = Some(page);
        true
    }

    /// Hand out the next free node of a small class
    ///
    /// The node stays on the New list; the Free cursor moves past it.
    pub(crate) fn class_get_free_node(&mut self, class: usize) -> Result<NodeId> {
        debug_assert!(class < NUM_SMALL_NODE_CLASSES);
        if !self.classes[class].has_free_node() {
            self.get_new_page(class)?;
        }
        let s = self.classes[class].free;
        self.classes[class].free = self.nodes[s].next;
        let node = &mut self.nodes[s];
        node.stamp = bump_stamp(node.stamp);
        self.budget.nodes_in_use += 1;
        Ok(s)
    }

    /// Return a page whose nodes are all unmarked to the system
    pub(crate) fn release_page(&mut self, page_id: PageId) {
        let Some(page) = self.pages[page_id].take() else {
            return;
        };
        let class = page.class as usize;
        for &id in &page.slots {
            unsnap(&mut self.nodes, id);
            self.vacate_slot(id);
        }
        let heap = &mut self.classes[class];
        heap.alloc_count -= page.slots.len();
        heap.pages.retain(|&p| p != page_id);
        self.vacant_pages.push(page_id);
        self.stats.record_page_released();
    }

    /// Release surplus empty pages, every `page_release_frequency` calls
    ///
    /// Per class the number of releasable pages is bounded by what exceeds
    /// the old nodes plus a `max_keep_fraction` margin. Pages are visited
    /// newest first.
    pub(crate) fn try_to_release_pages(&mut self) {
        if self.collector.release_countdown > 0 {
            self.collector.release_countdown -= 1;
            return;
        }
        self.collector.release_countdown =
            self.config.sizing.page_release_frequency.saturating_sub(1);

        let keep = 1.0 + self.config.sizing.max_keep_fraction;
        let mut released = 0;
        for class in 0..NUM_SMALL_NODE_CLASSES {
            let per_page = self.layout.nodes_per_page(class);
            let heap = &self.classes[class];
            let mut maxrel = heap.alloc_count as i64;
            for &count in &heap.old_count {
                maxrel -= (keep * count as f64) as i64;
            }
            let maxrel_pages = if maxrel > 0 {
                maxrel as usize / per_page
            } else {
                0
            };

            let candidates: Vec<PageId> = heap.pages.iter().rev().copied().collect();
            let mut rel_pages = 0;
            for page_id in candidates {
                if rel_pages >= maxrel_pages {
                    break;
                }
                if !self.page_in_use(page_id) {
                    self.release_page(page_id);
                    rel_pages += 1;
                }
            }
            released += rel_pages;

            let heap = &mut self.classes[class];
            heap.free = self.nodes[heap.new].next;
        }
        if released > 0 {
            crate::logging::log_pages_released(released);
        }
    }

    fn page_in_use(&self, page_id: PageId) -> bool {
        self.pages[page_id]
            .as_ref()
            .is_some_and(|page| page.slots.iter().any(|&id| self.nodes[id].marked))
    }

    /// Rebuild every small class's New list in page order
    pub(crate) fn sort_nodes(&mut self) {
        for class in 0..NUM_SMALL_NODE_CLASSES {
            let new = self.classes[class].new;
            self.nodes[new].next = new;
            self.nodes[new].prev = new;
            for p in (0..self.classes[class].pages.len()).rev() {
                let page_id = self.classes[class].pages[p];
                let Some(page) = self.pages[page_id].as_ref() else {
                    continue;
                };
                for &id in &page.slots {
                    if !self.nodes[id].marked {
                        snap(&mut self.nodes, id, new);
                    }
                }
            }
            self.classes[class].free = self.nodes[new].next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::lists::members;

    fn heap() -> Heap {
        Heap::new(GcConfig {
            initial_cells: 10_000,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_page_threads_nodes_onto_new_list() {
        let mut heap = heap();
        let class = 3;
        heap.get_new_page(class).unwrap();

        let new = heap.classes[class].new;
        assert_eq!(members(&heap.nodes, new).len(), 27);
        assert_eq!(heap.classes[class].alloc_count, 27);
        assert!(heap.classes[class].has_free_node());
        assert_eq!(heap.classes[class].free, heap.nodes[new].next);
    }

    #[test]
    fn test_free_cursor_walks_the_page() {
        let mut heap = heap();
        let class = 6;
        let per_page = heap.layout.nodes_per_page(class);
        let before = heap.budget.nodes_in_use;
        for _ in 0..per_page {
            heap.class_get_free_node(class).unwrap();
        }
        assert!(!heap.classes[class].has_free_node());
        assert_eq!(heap.budget.nodes_in_use, before + per_page);
        heap.class_get_free_node(class).unwrap();
        assert_eq!(heap.classes[class].pages.len(), 2);
    }

    #[test]
    fn test_handed_out_node_gets_fresh_stamp() {
        let mut heap = heap();
        let id = heap.class_get_free_node(4).unwrap();
        assert_ne!(heap.nodes[id].stamp, 0);
    }

    #[test]
    fn test_release_page_vacates_slots() {
        let mut heap = heap();
        let class = 5;
        heap.get_new_page(class).unwrap();
        let page_id = *heap.classes[class].pages.last().unwrap();

        heap.release_page(page_id);

        assert!(heap.pages[page_id].is_none());
        assert_eq!(heap.classes[class].alloc_count, 0);
        assert!(members(&heap.nodes, heap.classes[class].new).is_empty());
        assert_eq!(heap.vacant_pages, vec![page_id]);
    }

    #[test]
    fn test_payload_slices_do_not_overlap() {
        let mut page = Page::allocate(2, 35).unwrap();
        page.payload_mut(0).fill(1);
        page.payload_mut(1).fill(2);
        assert_eq!(page.payload(0), &[1u8; 16]);
        assert_eq!(page.payload(1), &[2u8; 16]);
    }
}
