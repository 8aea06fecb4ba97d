//! # nodeheap - Generational memory manager for an interpreter
//!
//! nodeheap manages every value of a dynamically typed interpreter: cells
//! (pairs, closures, environments, promises, ...) and vectors. It is a
//! non-moving, stop-the-world, generational mark collector with explicit
//! root registration.
//!
//! ## Overview
//!
//! - **Size-class pages**: small nodes come from fixed-size pages, one list
//!   per size class; large vectors get their own blocks
//! - **Generations**: survivors are promoted through a configurable number
//!   of old generations; minor collections never scan old nodes
//! - **Write barrier**: every pointer store through the accessors records
//!   old-to-new references
//! - **Adaptive budgets**: the cell and vector budgets grow and shrink with
//!   occupancy after full collections
//! - **Weak references and finalizers**: native closures or interpreter
//!   functions run when a key becomes unreachable
//! - **Roots**: a protect stack with RAII guards, call contexts, globals,
//!   a precious list and pluggable root providers
//! - **Transient arena**: call-scoped scratch allocation released by
//!   resetting a mark
//!
//! ## Quick Start
//!
//! ```rust
//! use nodeheap::{GcConfig, Handle, Heap, NodeKind};
//!
//! fn main() -> nodeheap::Result<()> {
//!     let mut heap = Heap::new(GcConfig::default())?;
//!
//!     // Build (1 2) as a pair list of integer vectors
//!     let one = heap.alloc_vector(NodeKind::Integer, 1)?;
//!     let _g1 = heap.root(one)?;
//!     heap.set_integer_elt(one, 0, 1)?;
//!     let list = heap.cons(one, Handle::NIL)?;
//!     let _list = heap.root(list)?;
//!
//!     // Rooted values survive; everything else is reclaimed
//!     heap.gc_full(0)?;
//!     assert_eq!(heap.integer_elt(heap.car(list)?, 0)?, 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── Heap ─────────────────────────────┐
//! │                                                               │
//! │  alloc ──▶ class lists ◀── page allocator / large blocks      │
//! │               │  New ─ Free ─ Old[g] ─ OldToNew[g]            │
//! │               │                                               │
//! │  accessors ── write barrier ──▶ OldToNew[g]                   │
//! │                                                               │
//! │  collector:  age ─ migrate ─ scan ─ trace ─ weak ─ sweep      │
//! │               ▲                                               │
//! │  roots: protect stack, contexts, globals, precious, providers │
//! │                                                               │
//! │  controller: budgets, page release, free-list sort            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Handles
//!
//! Values are [`Handle`]s: a slot index plus a reuse stamp. Nodes never
//! move, so a handle stays valid while its node is reachable. Once the slot
//! is reused or returned to the system, accessors report
//! [`HeapError::StaleHandle`].
//!
//! ## Modules
//!
//! - [`allocator`]: size classes, pages and large blocks
//! - [`config`]: configuration parameters and validation
//! - [`error`]: error types
//! - [`gc`]: collection passes, reports and limits
//! - [`heap`]: the node arena, constructors, accessors and barrier
//! - [`logging`]: collector events
//! - [`marker`]: forwarding and root registration
//! - [`object`]: node kinds, handles and weak records
//! - [`runtime`]: weak references and finalization
//! - [`stats`]: counters and pause times
//! - [`util`]: list inspection

pub mod config;
pub mod error;
pub mod gc;

pub mod allocator;
pub mod heap;
pub mod object;

pub mod marker;

pub mod logging;
pub mod runtime;
pub mod stats;

pub mod util;

pub use config::{ConfigError, GcConfig};
pub use error::{HeapError, Result};
pub use gc::MemoryReport;
pub use heap::{Heap, HeapStats, NodeInfo, SizingPolicy, TransientMark};
pub use marker::{CallContext, ContextGuard, GlobalRoot, RootProvider, RootToken, Rooted};
pub use object::{Finalizer, FinalizerHook, Handle, NodeKind};
pub use stats::{GcStats, GcSummary};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
