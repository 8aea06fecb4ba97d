//! Error Module - Node Heap Error Types
//!
//! Defines all error types returned by the memory manager.
//!
//! # Error Categories
//!
//! ## Allocation Errors
//! - `OutOfNodes` - No free cell after an escalated collection
//! - `OutOfVectorSpace` - Vector budget exhausted after an escalated collection
//! - `AllocationTooLarge` - Request cannot be represented at all
//! - `OutOfMemory` - The system allocator refused a page
//! - `NegativeLength` - Vector length below zero
//!
//! ## Root Registration Errors
//! - `ProtectionStackOverflow` - Registration stack depth exceeded
//! - `ProtectionStackUnderflow` - Popped more entries than present
//! - `NotProtected` - Value not found on the registration stack
//!
//! ## Integrity Errors
//! - `CorruptNode` - A reclaimed node was reached from a live reference
//! - `StaleHandle` - Handle names a slot that has been reused or released
//!
//! ## Usage Errors
//! - `WrongKind`, `IndexOutOfBounds`, `InvalidWeakKey`, `InvalidFinalizer`,
//!   `InvalidArgument`, `Configuration`, `HeapShutDown`
//!
//! ## Finalization
//! - `FinalizerFailed` - A finalizer returned an error

use crate::object::NodeKind;
use thiserror::Error;

/// Main error type for all heap operations
///
/// # Examples
///
/// ```rust
/// use nodeheap::HeapError;
///
/// fn describe(err: &HeapError) -> &'static str {
///     match err {
///         HeapError::OutOfVectorSpace => "vector heap exhausted",
///         HeapError::AllocationTooLarge { .. } => "request too large",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum HeapError {
    /// No free cell
    ///
    /// **When returned:** A cell or vector header was requested, a collection
    /// ran (escalating as far as it could) and the cell budget is still used up.
    ///
    /// **Recovery strategy:** Release roots, raise `max_cells`, or fail the
    /// interpreter operation.
    #[error("cons memory exhausted (limit reached?)")]
    OutOfNodes,

    /// Vector heap exhausted
    ///
    /// **When returned:** Free vector space is below the request after a
    /// collection and the budget may not grow further.
    ///
    /// **Recovery strategy:** Release large vectors or raise `max_vector_bytes`.
    ///
    /// **Example scenario:**
    /// ```ignore
    /// // 8 MB budget, growth disabled
    /// heap.alloc_vector(NodeKind::Raw, 10 * 1024 * 1024)?; // OutOfVectorSpace
    /// ```
    #[error("vector memory exhausted (limit reached?)")]
    OutOfVectorSpace,

    /// Request too large to represent
    ///
    /// **When returned:** The element count overflows the size arithmetic, or
    /// the system allocator refused a large block even after a full collection.
    ///
    /// **Recovery strategy:** None for this request; it is never retried.
    #[error("{message}")]
    AllocationTooLarge { message: String },

    /// System allocator refused a page
    ///
    /// **When returned:** A fresh page could not be obtained even after a
    /// full collection.
    ///
    /// **Recovery strategy:** Fail gracefully
    #[error("memory exhausted (limit reached?): could not obtain {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Negative vector length
    #[error("negative length vectors are not allowed")]
    NegativeLength,

    /// Registration stack overflow
    ///
    /// **When returned:** `push_root` beyond the configured depth.
    ///
    /// **Recovery strategy:** Unwind. A reserved margin is opened so the
    /// unwinding code can still register a few values.
    #[error("protect(): protection stack overflow")]
    ProtectionStackOverflow,

    /// Popped more entries than present
    #[error("unprotect(): only {available} protected items")]
    ProtectionStackUnderflow { available: usize },

    /// Value not on the registration stack
    #[error("unprotect_ptr: pointer not found")]
    NotProtected,

    /// Reclaimed node reached from a live reference
    ///
    /// **When returned:** Debug checks are on and the collector, or an
    /// accessor, met a node that had already been reclaimed.
    ///
    /// **Recovery strategy:** Cannot recover - a root registration or a write
    /// barrier is missing upstream.
    #[error("GC encountered a node ({index}) with type FREESXP (was {was})")]
    CorruptNode { index: u32, was: NodeKind },

    /// Handle names a reused or released slot
    ///
    /// **Recovery strategy:** Cannot recover - the value was collected while
    /// still in use.
    #[error("stale handle {index}:{stamp}")]
    StaleHandle { index: u32, stamp: u32 },

    /// Accessor used on the wrong kind of node
    #[error("wrong node kind: expected {expected}, found {found}")]
    WrongKind { expected: &'static str, found: NodeKind },

    /// Element index outside the vector
    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    /// Weak reference key of an unsupported kind
    #[error("can only weakly reference/finalize reference objects")]
    InvalidWeakKey,

    /// Finalizer value that is not a function
    #[error("finalizer must be a function or NULL")]
    InvalidFinalizer,

    /// A finalizer returned an error
    ///
    /// **When returned:** `run_pending_finalizers` after every ready
    /// finalizer ran; carries the first failure.
    ///
    /// **Recovery strategy:** Report it; the heap itself is consistent.
    #[error("finalizer failed: {message}")]
    FinalizerFailed { message: String },

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigError),

    /// Heap already shut down
    #[error("heap has been shut down")]
    HeapShutDown,
}

impl HeapError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HeapError::OutOfNodes
                | HeapError::OutOfVectorSpace
                | HeapError::AllocationTooLarge { .. }
                | HeapError::OutOfMemory { .. }
                | HeapError::NegativeLength
                | HeapError::ProtectionStackOverflow
                | HeapError::ProtectionStackUnderflow { .. }
                | HeapError::FinalizerFailed { .. }
        )
    }

    /// Check if this error indicates a bug in the code using the heap
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            HeapError::CorruptNode { .. } | HeapError::StaleHandle { .. }
        )
    }

    pub(crate) fn wrong_kind(expected: &'static str, found: NodeKind) -> Self {
        HeapError::WrongKind { expected, found }
    }
}

/// Result type alias for heap operations
pub type Result<T> = std::result::Result<T, HeapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_interpreter_wording() {
        assert_eq!(
            HeapError::OutOfNodes.to_string(),
            "cons memory exhausted (limit reached?)"
        );
        assert_eq!(
            HeapError::OutOfVectorSpace.to_string(),
            "vector memory exhausted (limit reached?)"
        );
        assert_eq!(
            HeapError::ProtectionStackUnderflow { available: 2 }.to_string(),
            "unprotect(): only 2 protected items"
        );
    }

    #[test]
    fn test_classification() {
        assert!(HeapError::ProtectionStackOverflow.is_recoverable());
        assert!(!HeapError::ProtectionStackOverflow.is_bug());
        let corrupt = HeapError::CorruptNode {
            index: 3,
            was: NodeKind::Pair,
        };
        assert!(corrupt.is_bug());
        assert!(!corrupt.is_recoverable());
    }
}
