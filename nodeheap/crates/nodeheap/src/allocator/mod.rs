//! Allocator Module - Size classes, pages and large blocks
//!
//! Every node belongs to one of eight size classes:
//!
//! | class | payload (vcells) | node bytes | nodes per 2000-byte page |
//! |-------|------------------|------------|--------------------------|
//! | 0     | cell, no vector  | 56         | 35                       |
//! | 1     | 1                | 48         | 40                       |
//! | 2     | 2                | 56         | 35                       |
//! | 3     | 4                | 72         | 27                       |
//! | 4     | 6                | 88         | 22                       |
//! | 5     | 8                | 104        | 18                       |
//! | 6     | 16               | 168        | 11                       |
//! | 7     | LARGE            | 40 + payload | one block per vector   |
//!
//! Small classes are carved out of fixed-size pages ([`page`]); class 7 owns
//! one independently allocated block per node ([`large`]).

pub mod large;
pub mod page;

pub(crate) use page::Page;

use crate::error::{HeapError, Result};
use crate::object::NodeKind;
use nodeheap_util::{bytes_to_vcells, VCELL_BYTES};

/// Number of size classes, LARGE included
pub const NUM_NODE_CLASSES: usize = 8;

/// Number of page-backed classes
pub const NUM_SMALL_NODE_CLASSES: usize = 7;

/// Class of vectors whose payload does not fit any page class
pub const LARGE_NODE_CLASS: usize = 7;

/// Payload capacity of each small class, in vector cells
pub const NODE_CLASS_VCELLS: [usize; NUM_SMALL_NODE_CLASSES] = [0, 1, 2, 4, 6, 8, 16];

/// Bytes of a non-vector cell node
pub const CELL_NODE_BYTES: usize = 56;

/// Bytes of a vector node header
pub const VECTOR_HEADER_BYTES: usize = 40;

/// Bytes of the header at the start of each page
pub const PAGE_HEADER_BYTES: usize = 8;

/// Longest vector the allocator accepts
pub const MAX_VECTOR_LENGTH: usize = i32::MAX as usize;

/// Byte size of one node of a small class
pub fn node_bytes(class: usize) -> usize {
    match class {
        0 => CELL_NODE_BYTES,
        c => VECTOR_HEADER_BYTES + NODE_CLASS_VCELLS[c] * VCELL_BYTES,
    }
}

/// Byte size of the biggest small node
pub fn largest_small_node_bytes() -> usize {
    node_bytes(NUM_SMALL_NODE_CLASSES - 1)
}

/// Page geometry derived from the configured page size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLayout {
    /// Usable page size: a whole number of cell nodes plus the header
    pub page_bytes: usize,
    /// Nodes carved out of one page, per small class
    pub nodes_per_page: [usize; NUM_SMALL_NODE_CLASSES],
}

impl PageLayout {
    pub fn new(base_page_bytes: usize) -> Self {
        let page_bytes = ((base_page_bytes - PAGE_HEADER_BYTES) / CELL_NODE_BYTES)
            * CELL_NODE_BYTES
            + PAGE_HEADER_BYTES;
        let mut nodes_per_page = [0; NUM_SMALL_NODE_CLASSES];
        for (class, count) in nodes_per_page.iter_mut().enumerate() {
            *count = (page_bytes - PAGE_HEADER_BYTES) / node_bytes(class);
        }
        Self {
            page_bytes,
            nodes_per_page,
        }
    }

    pub fn nodes_per_page(&self, class: usize) -> usize {
        self.nodes_per_page[class]
    }
}

/// Class chosen for a vector payload of `vcells` cells, with the vector
/// cells it is charged
///
/// Large vectors are charged exactly what they need.
pub fn class_for_vcells(vcells: usize) -> (usize, usize) {
    if vcells <= NODE_CLASS_VCELLS[1] {
        return (1, NODE_CLASS_VCELLS[1]);
    }
    NODE_CLASS_VCELLS
        .iter()
        .enumerate()
        .skip(2)
        .find(|(_, &size)| vcells <= size)
        .map(|(class, &size)| (class, size))
        .unwrap_or((LARGE_NODE_CLASS, vcells))
}

/// Vector cells needed by a vector of `kind` with `length` elements
///
/// Character vectors carry a trailing NUL.
pub fn vector_vcells(kind: NodeKind, length: usize) -> Result<usize> {
    let too_long = || HeapError::AllocationTooLarge {
        message: format!("cannot allocate vector of length {}", length),
    };
    let bytes = match kind {
        NodeKind::Char => length.checked_add(1).ok_or_else(too_long)?,
        kind => match kind.element_bytes() {
            Some(size) => length.checked_mul(size).ok_or_else(too_long)?,
            None => {
                return Err(HeapError::InvalidArgument(format!(
                    "invalid type/length ({}/{}) in vector allocation",
                    kind, length
                )))
            }
        },
    };
    if length > MAX_VECTOR_LENGTH {
        return Err(too_long());
    }
    Ok(bytes_to_vcells(bytes))
}
