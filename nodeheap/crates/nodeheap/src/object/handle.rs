//! Handles - generation-checked references to heap nodes
//!
//! A [`Handle`] names a node slot in the heap arena together with the slot's
//! reuse stamp. Every time a slot is handed out by an allocator, or its page
//! or large block goes back to the system, the slot's stamp changes, so a
//! handle kept past the life of its node is detected instead of silently
//! aliasing a newer node.
//!
//! ```text
//! 64-bit handle layout (as exchanged over the C ABI):
//! ┌──────────────────────┬──────────────────────┐
//! │  stamp (63-32)       │  slot index (31-0)   │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! The all-zero value is [`Handle::NIL`]; real nodes always carry a non-zero
//! stamp.

use std::fmt;

nodeheap_util::define_idx!(
    /// Slot index in the node arena
    pub(crate) NodeId
);

nodeheap_util::define_idx!(
    /// Slot index in the page table
    pub(crate) PageId
);

/// Reference to a heap node
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle {
    index: u32,
    stamp: u32,
}

impl Handle {
    /// The nil value. Never a node: permanently live, oldest, childless.
    pub const NIL: Handle = Handle { index: 0, stamp: 0 };

    pub(crate) fn new(id: NodeId, stamp: u32) -> Self {
        debug_assert!(stamp != 0, "live nodes never carry stamp 0");
        Handle { index: id.0, stamp }
    }

    /// True for [`Handle::NIL`]
    pub fn is_nil(self) -> bool {
        self.stamp == 0
    }

    /// Arena slot index
    pub fn index(self) -> u32 {
        self.index
    }

    /// Reuse stamp
    pub fn stamp(self) -> u32 {
        self.stamp
    }

    /// Pack into 64 bits
    pub fn to_bits(self) -> u64 {
        (u64::from(self.stamp) << 32) | u64::from(self.index)
    }

    /// Unpack from 64 bits
    pub fn from_bits(bits: u64) -> Self {
        Handle {
            index: bits as u32,
            stamp: (bits >> 32) as u32,
        }
    }

    pub(crate) fn id(self) -> NodeId {
        NodeId(self.index)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "Handle(nil)")
        } else {
            write!(f, "Handle({}@{})", self.index, self.stamp)
        }
    }
}

/// Next stamp for a slot, skipping the value reserved for nil.
pub(crate) fn bump_stamp(stamp: u32) -> u32 {
    match stamp.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}
