//! IndexVec - A vector indexed by a specific type.
//!
//! This module provides [`IndexVec`], a typed vector that uses a custom index type
//! instead of `usize`. The node heap keeps its node arena and page table in
//! `IndexVec`s so that node ids and page ids cannot be confused.
//!
//! # Example
//!
//! ```
//! use nodeheap_util::index_vec::{IndexVec, Idx};
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq)]
//! struct SlotId(u32);
//!
//! impl Idx for SlotId {
//!     fn from_usize(idx: usize) -> Self { SlotId(idx as u32) }
//!     fn index(self) -> usize { self.0 as usize }
//! }
//!
//! let mut slots: IndexVec<SlotId, i32> = IndexVec::new();
//! let id = slots.push(42);
//! assert_eq!(slots[id], 42);
//! ```

use std::collections::TryReserveError;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};


/// Trait for types that can be used as indices
///
/// # Requirements
///
/// - `from_usize(index).index() == index` for all valid indices
/// - `from_usize` may panic if the index exceeds the type's capacity
pub trait Idx: Copy + Eq + PartialEq {
    /// Convert from usize to index type
    fn from_usize(idx: usize) -> Self;

    /// Convert index to usize for array indexing
    fn index(self) -> usize;
}

/// A vector indexed by a specific type
///
/// # Type Parameters
///
/// - `I`: The index type (must implement [`Idx`])
/// - `T`: The element type
#[derive(Clone, Debug)]
pub struct IndexVec<I, T> {
    raw: Vec<T>,
    _marker: PhantomData<fn(&I)>,
}

impl<I, T> IndexVec<I, T> {
    /// Create empty IndexVec
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Create with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: Vec::with_capacity(capacity),
            _marker: PhantomData,
        }
    }

    /// Returns number of elements
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true if empty
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Get capacity
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Reserve room for `additional` more elements, reporting failure
    /// instead of aborting.
    ///
    /// The heap grows its arena through this so an exhausted system
    /// allocator surfaces as an ordinary allocation error.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.raw.try_reserve(additional)
    }

    /// Clear all elements
    pub fn clear(&mut self) {
        self.raw.clear()
    }

    /// Borrow the underlying slice
    pub fn as_slice(&self) -> &[T] {
        &self.raw
    }

    /// Iterate over values
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.raw.iter()
    }

    /// Iterate over values mutably
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.raw.iter_mut()
    }
}

impl<I: Idx, T> IndexVec<I, T> {
    /// Push element and return typed index
    pub fn push(&mut self, value: T) -> I {
        let index = self.raw.len();
        self.raw.push(value);
        I::from_usize(index)
    }

    /// Index the next `push` will return
    pub fn next_index(&self) -> I {
        I::from_usize(self.raw.len())
    }

    /// Get element by index
    pub fn get(&self, index: I) -> Option<&T> {
        self.raw.get(index.index())
    }

    /// Get mutable element by index
    pub fn get_mut(&mut self, index: I) -> Option<&mut T> {
        self.raw.get_mut(index.index())
    }

    /// Iterate over (index, value) pairs
    pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> {
        self.raw
            .iter()
            .enumerate()
            .map(|(i, v)| (I::from_usize(i), v))
    }

    /// Iterate over indices only
    pub fn indices(&self) -> impl Iterator<Item = I> {
        (0..self.raw.len()).map(I::from_usize)
    }
}

impl<I: Idx, T> Index<I> for IndexVec<I, T> {
    type Output = T;

    fn index(&self, index: I) -> &T {
        &self.raw[index.index()]
    }
}

impl<I: Idx, T> IndexMut<I> for IndexVec<I, T> {
    fn index_mut(&mut self, index: I) -> &mut T {
        &mut self.raw[index.index()]
    }
}

impl<I, T> Default for IndexVec<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Macro to define index types easily
///
/// The generated type is a `u32` newtype with a reserved `INVALID` value
/// (`u32::MAX`) usable as an "unlinked" sentinel.
#[macro_export]
macro_rules! define_idx {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name(pub u32);

        impl $name {
            /// Sentinel that never names a live element
            pub const INVALID: $name = $name(u32::MAX);

            /// True unless this is [`Self::INVALID`]
            pub fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl $crate::index_vec::Idx for $name {
            fn from_usize(idx: usize) -> Self {
                assert!(idx < u32::MAX as usize, "Index {} exceeds u32::MAX", idx);
                $name(idx as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}
