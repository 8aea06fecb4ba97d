//! Transient Arena - Call-scoped scratch allocations
//!
//! Scratch blocks are ordinary vectors chained through their attribute
//! slot onto a single head, which is a root. Saving the head gives a mark;
//! restoring it drops every block allocated since, and the next collection
//! reclaims them together.
//!
//! ```text
//! head ─▶ block3 ─attrib▶ block2 ─attrib▶ block1 ─attrib▶ nil
//!                          ▲
//!                          mark saved before block3
//! ```

use super::Heap;
use crate::allocator::MAX_VECTOR_LENGTH;
use crate::error::{HeapError, Result};
use crate::object::{Handle, NodeKind};

/// Saved arena head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientMark(pub(crate) Handle);

impl TransientMark {
    pub fn handle(self) -> Handle {
        self.0
    }

    pub fn from_handle(h: Handle) -> Self {
        TransientMark(h)
    }
}

impl Heap {
    /// Allocate `count * elt_size` scratch bytes on the arena
    ///
    /// Returns nil for an empty request. The block is a `Raw` vector with
    /// one spare byte; requests too long for a raw vector use a `Real`
    /// vector instead.
    pub fn transient_alloc(&mut self, count: usize, elt_size: usize) -> Result<Handle> {
        let dsize = count as f64 * elt_size as f64;
        if dsize <= 0.0 {
            return Ok(Handle::NIL);
        }
        let max = MAX_VECTOR_LENGTH as f64;
        let block = if dsize < max {
            self.alloc_vector(NodeKind::Raw, dsize as i64 + 1)?
        } else if dsize < 8.0 * (max - 1.0) {
            self.alloc_vector(NodeKind::Real, (0.99 + dsize / 8.0) as i64)?
        } else {
            return Err(HeapError::AllocationTooLarge {
                message: format!(
                    "cannot allocate memory block of size {:.1} Gb",
                    dsize / 1024.0 / 1024.0 / 1024.0
                ),
            });
        };
        self.nodes[block.id()].attrib = self.roots.transient;
        self.roots.transient = block;
        Ok(block)
    }

    /// Current arena head
    pub fn begin_transient_scope(&self) -> TransientMark {
        TransientMark(self.roots.transient)
    }

    /// Drop everything allocated on the arena since `mark`
    pub fn end_transient_scope(&mut self, mark: TransientMark) {
        self.roots.transient = mark.0;
    }

    /// Run `f` and rewind the arena afterwards, whether `f` fails or not
    pub fn with_transient_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Heap) -> Result<T>,
    ) -> Result<T> {
        let mark = self.begin_transient_scope();
        let out = f(self);
        self.end_transient_scope(mark);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    fn heap() -> Heap {
        Heap::new(GcConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_request_is_nil() {
        let mut heap = heap();
        assert!(heap.transient_alloc(0, 8).unwrap().is_nil());
    }

    #[test]
    fn test_blocks_chain_and_survive_collection() {
        let mut heap = heap();
        let a = heap.transient_alloc(10, 1).unwrap();
        let b = heap.transient_alloc(4, 8).unwrap();
        assert_eq!(heap.length(a).unwrap(), 11);
        assert_eq!(heap.attrib(b).unwrap(), a);

        heap.gc_full(0).unwrap();
        assert!(heap.is_valid(a));
        assert!(heap.is_valid(b));
    }

    #[test]
    fn test_rewind_releases_blocks() {
        let mut heap = heap();
        let mark = heap.begin_transient_scope();
        let block = heap.transient_alloc(100, 1).unwrap();
        heap.end_transient_scope(mark);
        heap.gc_full(0).unwrap();
        assert!(!heap.is_valid(block));
    }

    #[test]
    fn test_scope_rewinds_on_error() {
        let mut heap = heap();
        let mark = heap.begin_transient_scope();
        let result: Result<()> = heap.with_transient_scope(|heap| {
            heap.transient_alloc(16, 1)?;
            Err(HeapError::NotProtected)
        });
        assert!(result.is_err());
        assert_eq!(heap.begin_transient_scope(), mark);
    }

    #[test]
    fn test_huge_request_is_too_large() {
        let mut heap = heap();
        let err = heap.transient_alloc(usize::MAX / 2, 8).unwrap_err();
        assert!(err.to_string().starts_with("cannot allocate memory block of size"));
    }
}
