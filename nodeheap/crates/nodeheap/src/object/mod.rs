//! Object Module - Heap node model
//!
//! This module defines the structure of nodes managed by the heap: the
//! [`Handle`] values the mutator holds, the per-node header, the per-kind
//! reference map the tracer follows, and the weak reference records.

pub mod handle;
pub mod header;
pub mod refmap;
pub mod weak;

pub use handle::Handle;
pub(crate) use handle::{NodeId, PageId};
pub use header::NodeKind;
pub(crate) use header::{Body, Home, Node};
pub use refmap::ReferenceMap;
pub use weak::{Finalizer, FinalizerHook, NativeFinalizer};
pub(crate) use weak::WeakRecord;
