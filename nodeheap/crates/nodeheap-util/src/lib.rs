//! nodeheap-util - Foundation Types for the Node Heap
//!
//! ============================================================================
//! MODULE OVERVIEW
//! ============================================================================
//!
//! Small building blocks shared by the heap crates:
//!
//! - [`index_vec`]: typed-index vectors. The heap stores every node, page and
//!   list anchor in an `IndexVec` and links them with typed ids instead of raw
//!   pointers, so a list splice is an index write rather than pointer surgery.
//! - [`size`]: byte and vector-cell arithmetic plus the human readable size
//!   strings used in allocation error messages and collection reports.
//!
//! DESIGN PRINCIPLES:
//! ------------------
//! 1. TYPE SAFETY
//!    A `NodeId` can never index the page table and vice versa.
//!
//! 2. ZERO-COST
//!    Typed indices are `u32` newtypes; an `IndexVec` is a `Vec`.

pub mod index_vec;
pub mod size;

pub use index_vec::{Idx, IndexVec};
pub use size::{bytes_to_vcells, format_block_size, megabytes, VCELL_BYTES};

// Re-export commonly used types
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
