//! Heap Management Module - The node arena and its bookkeeping
//!
//! This module owns every node the interpreter creates. Nodes live in one
//! arena (`IndexVec<NodeId, Node>`) and are linked into per-class,
//! per-generation lists by index; nothing ever moves once allocated, so a
//! [`Handle`] stays valid for as long as its node is reachable.
//!
//! Heap Structure:
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Heap                            │
//! │  nodes: [peg peg peg ... | page slots ... | large ...]   │
//! │  classes[0..8]: New / Free / Old[g] / OldToNew[g] pegs   │
//! │  pages: per small class, fixed size, payload bytes       │
//! │  budget: cell and vector-cell budgets + usage counters   │
//! │  roots: protect stack, contexts, globals, precious, ...  │
//! │  weak_refs: singly linked list of weak reference records │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Submodules add the operations:
//!
//! - [`alloc`](self::alloc): node constructors (vectors, cells, environments)
//! - `access`: field accessors, every pointer store goes through the barrier
//! - `barrier`: write barrier and node aging
//! - [`transient`]: the scratch arena freed by resetting a mark
//! - [`adaptive`]: post-collection budget control
//! - [`lists`]: intrusive list primitives

pub mod access;
pub mod adaptive;
pub mod alloc;
pub(crate) mod barrier;
pub(crate) mod lists;
pub mod transient;

pub use access::NodeInfo;
pub use adaptive::{AdaptiveState, HeapBudget, HeapSizeStats, SizingPolicy};
pub use transient::TransientMark;

use crate::allocator::{Page, PageLayout, NUM_NODE_CLASSES, NUM_SMALL_NODE_CLASSES};
use crate::config::GcConfig;
use crate::error::{HeapError, Result};
use crate::gc::CollectorState;
use crate::marker::mark_queue::ForwardStack;
use crate::marker::roots::RootSet;
use crate::object::{FinalizerHook, Handle, Node, NodeId, PageId};
use crate::stats::GcStats;
use lists::ClassHeap;
use nodeheap_util::{FxHashMap, IndexVec, VCELL_BYTES};
use serde::Serialize;

/// Heap - owner of every node, page and root
///
/// One `Heap` is one independent interpreter memory. All entry points take
/// `&mut self`; a collection runs inline inside whichever call needs one.
///
/// # Examples
///
/// ```rust
/// use nodeheap::{GcConfig, Heap, NodeKind};
///
/// let mut heap = Heap::new(GcConfig::default()).unwrap();
/// let v = heap.alloc_vector(NodeKind::Integer, 10).unwrap();
/// let _guard = heap.root(v).unwrap();
/// heap.gc_full(0).unwrap();
/// assert_eq!(heap.length(v).unwrap(), 10);
/// ```
pub struct Heap {
    pub(crate) config: GcConfig,

    /// Node arena: pegs, page slots and large nodes
    pub(crate) nodes: IndexVec<NodeId, Node>,

    /// Arena slots not backed by a page or a large block
    pub(crate) vacant: Vec<NodeId>,

    /// Page table; released pages leave a `None`
    pub(crate) pages: IndexVec<PageId, Option<Page>>,
    pub(crate) vacant_pages: Vec<PageId>,

    /// Per size class lists
    pub(crate) classes: Vec<ClassHeap>,
    pub(crate) layout: PageLayout,

    /// Budgets and usage counters
    pub(crate) budget: HeapBudget,

    /// Generation schedule, torture countdown and collection counters
    pub(crate) collector: CollectorState,

    /// Nodes marked but not yet scanned
    pub(crate) forward: ForwardStack,

    pub(crate) roots: RootSet,
    pub(crate) root_scratch: Vec<Handle>,

    /// Head of the weak reference list
    pub(crate) weak_refs: Handle,
    pub(crate) finalizer_hook: Option<FinalizerHook>,
    pub(crate) finalizers_running: bool,

    /// Interned character vectors; entries are dropped once unreachable
    pub(crate) char_cache: FxHashMap<Box<[u8]>, Handle>,
    pub(crate) blank_string: Handle,
    pub(crate) na_string: Handle,

    pub(crate) stats: GcStats,
    pub(crate) shut_down: bool,
}

impl Heap {
    /// Create a heap with the given configuration
    ///
    /// # Arguments
    /// * `config` - budgets, generation schedule and debug knobs
    pub fn new(config: GcConfig) -> Result<Self> {
        config.validate()?;

        let generations = config.num_old_generations;
        let mut nodes = IndexVec::new();
        let classes = (0..NUM_NODE_CLASSES)
            .map(|class| ClassHeap::new(&mut nodes, class as u8, generations))
            .collect();

        let layout = PageLayout::new(config.page_size);
        let budget = HeapBudget::new(
            config.initial_cells,
            config.max_cells,
            config.initial_vector_bytes,
            config.max_vector_bytes,
        );
        let collector = CollectorState::new(&config);
        let roots = RootSet::new(config.protect_stack_size);

        let mut heap = Self {
            config,
            nodes,
            vacant: Vec::new(),
            pages: IndexVec::new(),
            vacant_pages: Vec::new(),
            classes,
            layout,
            budget,
            collector,
            forward: ForwardStack::new(),
            roots,
            root_scratch: Vec::new(),
            weak_refs: Handle::NIL,
            finalizer_hook: None,
            finalizers_running: false,
            char_cache: FxHashMap::default(),
            blank_string: Handle::NIL,
            na_string: Handle::NIL,
            stats: GcStats::new(),
            shut_down: false,
        };

        heap.blank_string = heap.mk_char(b"")?;
        heap.na_string = heap.alloc_char(b"NA")?;

        log::debug!(
            "heap created: {} cells, {} vector cells, {} old generations, {}-byte pages",
            heap.budget.n_size,
            heap.budget.v_size,
            generations,
            heap.layout.page_bytes
        );

        Ok(heap)
    }

    /// Create a heap from `NODEHEAP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GcConfig::from_env())
    }

    /// Configuration the heap was created with
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Run exit finalizers and release all storage
    ///
    /// Records registered with `on_exit` are finalized regardless of
    /// reachability. A second call does nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        let finalized = self.run_exit_finalizers();

        self.shut_down = true;
        self.weak_refs = Handle::NIL;
        self.char_cache.clear();
        self.roots.clear();
        self.pages = IndexVec::new();
        self.vacant_pages.clear();
        self.nodes = IndexVec::new();
        self.vacant.clear();
        self.classes.clear();
        self.budget.nodes_in_use = 0;
        self.budget.small_valloc = 0;
        self.budget.large_valloc = 0;

        log::debug!("heap shut down after {} collections", self.collector.gc_count);
        finalized.map(|_| ())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Blank string `""`, the fill value of new character vectors
    pub fn blank_string(&self) -> Handle {
        self.blank_string
    }

    /// Missing-value string, distinct from any interned `"NA"`
    pub fn na_string(&self) -> Handle {
        self.na_string
    }

    /// Snapshot of budgets and usage
    pub fn heap_stats(&self) -> HeapStats {
        let pages_per_class = self
            .classes
            .iter()
            .take(NUM_SMALL_NODE_CLASSES)
            .map(|class| class.pages.len())
            .collect();
        HeapStats {
            cells_in_use: self.budget.nodes_in_use,
            cell_budget: self.budget.n_size,
            max_cells: self.budget.max_n_size,
            small_vcells: self.budget.small_valloc,
            large_vcells: self.budget.large_valloc,
            vcell_budget: self.budget.v_size,
            max_vcells: self.budget.max_v_size,
            pages_per_class,
            weak_refs: self.weak_ref_count(),
            protect_depth: self.roots.stack.depth(),
            collections: self.collector.gc_count,
        }
    }

    pub(crate) fn check_live(&self) -> Result<()> {
        if self.shut_down {
            return Err(HeapError::HeapShutDown);
        }
        Ok(())
    }

    /// Take a vacant arena slot, growing the arena when none is left
    pub(crate) fn take_slot(&mut self) -> Result<NodeId> {
        if let Some(id) = self.vacant.pop() {
            return Ok(id);
        }
        self.nodes
            .try_reserve(1)
            .map_err(|_| HeapError::OutOfMemory {
                requested: std::mem::size_of::<Node>(),
            })?;
        Ok(self.nodes.push(Node::vacant()))
    }

    /// Return a slot to the vacant pool; handles to it become stale
    pub(crate) fn vacate_slot(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        let stamp = crate::object::handle::bump_stamp(node.stamp);
        *node = Node::vacant();
        node.stamp = stamp;
        self.vacant.push(id);
    }

    fn weak_ref_count(&self) -> usize {
        let mut count = 0;
        let mut w = self.weak_refs;
        while let Some(next) = self.weak_next(w) {
            count += 1;
            w = next;
        }
        count
    }
}

/// Budget and usage snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct HeapStats {
    /// Nodes in use, all classes
    pub cells_in_use: usize,
    pub cell_budget: usize,
    pub max_cells: usize,
    /// Vector cells held by small vectors
    pub small_vcells: usize,
    /// Vector cells held by large vectors
    pub large_vcells: usize,
    pub vcell_budget: usize,
    pub max_vcells: usize,
    /// Pages held by each small class
    pub pages_per_class: Vec<usize>,
    /// Registered weak references
    pub weak_refs: usize,
    pub protect_depth: usize,
    pub collections: usize,
}

impl HeapStats {
    /// Vector bytes in use
    pub fn vector_bytes(&self) -> usize {
        (self.small_vcells + self.large_vcells) * VCELL_BYTES
    }

    /// Cell budget usage in percent
    pub fn cell_utilization_percent(&self) -> f64 {
        if self.cell_budget == 0 {
            return 0.0;
        }
        (self.cells_in_use as f64 / self.cell_budget as f64) * 100.0
    }

    pub fn total_pages(&self) -> usize {
        self.pages_per_class.iter().sum()
    }
}
