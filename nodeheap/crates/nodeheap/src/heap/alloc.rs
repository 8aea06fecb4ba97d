//! Node Constructors
//!
//! Every constructor follows the same shape:
//!
//! 1. validate arguments
//! 2. collect first if torture mode fires or the relevant budget is used up
//!    (arguments stay pinned while the collection runs)
//! 3. take a node from its size class, or a fresh block for large vectors
//! 4. initialise the body; nothing here needs the write barrier because a
//!    fresh node is always the youngest node in the heap
//!
//! Allocation never returns a partially built node: an error leaves the
//! heap exactly as a successful collection would have left it.

use super::Heap;
use crate::allocator::large::{alloc_large_block, max_large_vcells};
use crate::allocator::{class_for_vcells, vector_vcells, LARGE_NODE_CLASS, NODE_CLASS_VCELLS};
use crate::error::{HeapError, Result};
use crate::marker::GlobalRoot;
use crate::object::{Body, Handle, NodeId, NodeKind};
use nodeheap_util::{format_block_size, VCELL_BYTES};

impl Heap {
    /// Run `f` with `args` registered as roots
    pub(crate) fn with_pinned<T>(
        &mut self,
        args: &[Handle],
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let depth = self.roots.pinned.len();
        self.roots.pinned.extend_from_slice(args);
        let out = f(self);
        self.roots.pinned.truncate(depth);
        out
    }

    /// Collect if a cell allocation may not proceed yet
    fn cell_gc_check(&mut self) -> Result<()> {
        if self.collector.torture_fires() || self.budget.no_free_nodes() {
            self.gc_internal(0)?;
            if self.budget.no_free_nodes() {
                crate::logging::log_allocation_failure(0, 0);
                return Err(HeapError::OutOfNodes);
            }
        }
        Ok(())
    }

    /// Take a class-0 node, collecting first when needed
    fn new_cell_node(&mut self, pinned: &[Handle]) -> Result<NodeId> {
        self.check_live()?;
        for &h in pinned {
            self.check_handle(h)?;
        }
        self.with_pinned(pinned, |heap| {
            heap.cell_gc_check()?;
            heap.class_get_free_node(0)
        })
    }

    fn finish(&mut self, id: NodeId, kind: NodeKind, body: Body) -> Handle {
        let node = &mut self.nodes[id];
        node.reset(kind, body);
        self.stats.record_allocation();
        node.handle(id)
    }

    fn new_cell(&mut self, kind: NodeKind, slots: [Handle; 3]) -> Result<Handle> {
        let id = self.new_cell_node(&slots)?;
        Ok(self.finish(id, kind, Body::Cell(slots)))
    }

    /// Pair cell `(car . cdr)`
    pub fn cons(&mut self, car: Handle, cdr: Handle) -> Result<Handle> {
        self.new_cell(NodeKind::Pair, [car, cdr, Handle::NIL])
    }

    /// Language cell `(car . cdr)`
    pub fn lcons(&mut self, car: Handle, cdr: Handle) -> Result<Handle> {
        self.new_cell(NodeKind::Language, [car, cdr, Handle::NIL])
    }

    /// Pair list of `n` nil cells
    pub fn alloc_list(&mut self, n: usize) -> Result<Handle> {
        let mut result = Handle::NIL;
        for _ in 0..n {
            result = self.cons(Handle::NIL, result)?;
        }
        Ok(result)
    }

    /// Non-vector node of `kind` with empty fields
    pub fn alloc_sexp(&mut self, kind: NodeKind) -> Result<Handle> {
        let body = match kind {
            k if k.is_cell() => Body::Cell([Handle::NIL; 3]),
            NodeKind::ExternalPtr => Body::External {
                addr: 0,
                prot: Handle::NIL,
                tag: Handle::NIL,
            },
            NodeKind::Builtin | NodeKind::Special => Body::Primitive(0),
            NodeKind::S4 => Body::Empty,
            other => {
                return Err(HeapError::InvalidArgument(format!(
                    "cannot allocate a {} node with alloc_sexp",
                    other
                )))
            }
        };
        let id = self.new_cell_node(&[])?;
        Ok(self.finish(id, kind, body))
    }

    /// Environment whose frame is `valuelist`, tagged from `namelist`
    ///
    /// Tags are copied pairwise until either list runs out.
    pub fn new_environment(
        &mut self,
        namelist: Handle,
        valuelist: Handle,
        rho: Handle,
    ) -> Result<Handle> {
        let env = self.new_cell(NodeKind::Environment, [valuelist, rho, Handle::NIL])?;
        let (mut v, mut n) = (valuelist, namelist);
        while !v.is_nil() && !n.is_nil() {
            let tag = self.tag(n)?;
            self.set_tag(v, tag)?;
            v = self.cdr(v)?;
            n = self.cdr(n)?;
        }
        Ok(env)
    }

    /// Unevaluated promise of `expr` in `env`
    pub fn new_promise(&mut self, expr: Handle, env: Handle) -> Result<Handle> {
        let unbound = self.global(GlobalRoot::UnboundValue);
        self.new_cell(NodeKind::Promise, [unbound, expr, env])
    }

    pub fn new_closure(&mut self, formals: Handle, body: Handle, env: Handle) -> Result<Handle> {
        self.new_cell(NodeKind::Closure, [formals, body, env])
    }

    /// External pointer to foreign memory at `addr`
    pub fn new_external_ptr(&mut self, addr: usize, tag: Handle, prot: Handle) -> Result<Handle> {
        let id = self.new_cell_node(&[tag, prot])?;
        Ok(self.finish(id, NodeKind::ExternalPtr, Body::External { addr, prot, tag }))
    }

    /// Builtin or special with dispatch `code`
    pub fn mk_primitive(&mut self, kind: NodeKind, code: u32) -> Result<Handle> {
        if !matches!(kind, NodeKind::Builtin | NodeKind::Special) {
            return Err(HeapError::wrong_kind("primitive", kind));
        }
        let id = self.new_cell_node(&[])?;
        Ok(self.finish(id, kind, Body::Primitive(code)))
    }

    /// Interned character node for `bytes`
    ///
    /// Equal byte strings share one node for as long as it is reachable.
    pub fn mk_char(&mut self, bytes: &[u8]) -> Result<Handle> {
        if let Some(&h) = self.char_cache.get(bytes) {
            if self.traceable(h).is_some() {
                return Ok(h);
            }
        }
        let h = self.alloc_char(bytes)?;
        self.char_cache.insert(bytes.into(), h);
        Ok(h)
    }

    /// Character node outside the cache
    pub(crate) fn alloc_char(&mut self, bytes: &[u8]) -> Result<Handle> {
        let h = self.alloc_vector(NodeKind::Char, bytes.len() as i64)?;
        let id = h.id();
        self.node_payload_mut(id)[..bytes.len()].copy_from_slice(bytes);
        Ok(h)
    }

    /// One-element character vector holding `bytes`
    pub fn mk_string(&mut self, bytes: &[u8]) -> Result<Handle> {
        let ch = self.mk_char(bytes)?;
        let _pin = self.root(ch)?;
        let s = self.alloc_vector(NodeKind::Str, 1)?;
        self.set_string_elt(s, 0, ch)?;
        Ok(s)
    }

    /// Vector of `kind` with `length` elements
    ///
    /// `Pair` and `Language` build pair lists (a zero-length language
    /// object is nil). New list vectors hold nil, new character vectors the
    /// blank string, and data vectors zeros.
    pub fn alloc_vector(&mut self, kind: NodeKind, length: i64) -> Result<Handle> {
        self.check_live()?;
        if length < 0 {
            return Err(HeapError::NegativeLength);
        }
        let length = usize::try_from(length).map_err(|_| HeapError::AllocationTooLarge {
            message: format!("cannot allocate vector of length {}", length),
        })?;
        match kind {
            NodeKind::Nil => return Ok(Handle::NIL),
            NodeKind::Pair => return self.alloc_list(length),
            NodeKind::Language => {
                if length == 0 {
                    return Ok(Handle::NIL);
                }
                let list = self.alloc_list(length)?;
                let id = list.id();
                self.nodes[id].kind = NodeKind::Language;
                self.nodes[id].prior_kind = NodeKind::Language;
                return Ok(list);
            }
            _ => {}
        }

        let vcells = vector_vcells(kind, length)?;
        let (class, alloc_size) = class_for_vcells(vcells);
        if class == LARGE_NODE_CLASS && vcells >= max_large_vcells() {
            return Err(self.too_large(vcells));
        }

        let old_v_size = self.budget.v_size;
        if self.collector.torture_fires()
            || self.budget.no_free_nodes()
            || self.budget.vheap_free() < alloc_size
        {
            self.gc_internal(alloc_size)?;
            if self.budget.no_free_nodes() {
                crate::logging::log_allocation_failure(class, 0);
                return Err(HeapError::OutOfNodes);
            }
            if self.budget.vheap_free() < alloc_size {
                crate::logging::log_allocation_failure(class, vcells * VCELL_BYTES);
                return Err(HeapError::OutOfVectorSpace);
            }
        }

        let id = if vcells == 0 {
            self.class_get_free_node(0)?
        } else if class != LARGE_NODE_CLASS {
            let id = self.class_get_free_node(class)?;
            self.budget.small_valloc += alloc_size;
            debug_assert_eq!(alloc_size, NODE_CLASS_VCELLS[class]);
            id
        } else {
            let block = match alloc_large_block(vcells) {
                Some(block) => block,
                None => {
                    log::debug!("large block of {} vcells refused, collecting", vcells);
                    self.gc_full(alloc_size)?;
                    match alloc_large_block(vcells) {
                        Some(block) => block,
                        None => {
                            self.budget.v_size = old_v_size;
                            return Err(self.too_large(vcells));
                        }
                    }
                }
            };
            let id = self.link_large_node(kind, length, block)?;
            let handle = self.nodes[id].handle(id);
            self.stats.record_allocation();
            self.fill_new_vector(id, kind, length);
            return Ok(handle);
        };

        let h = self.finish(id, kind, Body::Vector { length, large: None });
        // Page slots are reused, so clear whatever the last occupant left
        self.node_payload_mut(id).fill(0);
        self.fill_new_vector(id, kind, length);
        Ok(h)
    }

    fn fill_new_vector(&mut self, id: NodeId, kind: NodeKind, length: usize) {
        if kind == NodeKind::Str {
            let blank = self.blank_string;
            for i in 0..length {
                self.set_handle_elt(id, i, blank);
            }
        }
    }

    fn too_large(&self, vcells: usize) -> HeapError {
        let bytes = vcells as f64 * VCELL_BYTES as f64;
        crate::logging::log_allocation_failure(LARGE_NODE_CLASS, vcells.saturating_mul(VCELL_BYTES));
        HeapError::AllocationTooLarge {
            message: format!("cannot allocate vector of size {}", format_block_size(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::allocator::LARGE_NODE_CLASS;
    use crate::config::GcConfig;
    use crate::error::HeapError;
    use crate::heap::Heap;
    use crate::marker::GlobalRoot;
    use crate::object::{Handle, NodeKind};

    fn heap() -> Heap {
        Heap::new(GcConfig::default()).unwrap()
    }

    #[test]
    fn test_vector_class_selection() {
        let mut heap = heap();
        let small = heap.alloc_vector(NodeKind::Real, 2).unwrap();
        assert_eq!(heap.node_info(small).unwrap().class, 2);
        let large = heap.alloc_vector(NodeKind::Real, 17).unwrap();
        assert_eq!(heap.node_info(large).unwrap().class, LARGE_NODE_CLASS as u8);
        let empty = heap.alloc_vector(NodeKind::Integer, 0).unwrap();
        assert_eq!(heap.node_info(empty).unwrap().class, 0);
        assert_eq!(heap.length(empty).unwrap(), 0);
    }

    #[test]
    fn test_small_and_large_vcells_are_charged() {
        let mut heap = heap();
        let before = heap.heap_stats();
        heap.alloc_vector(NodeKind::Raw, 20).unwrap();
        heap.alloc_vector(NodeKind::Real, 100).unwrap();
        let after = heap.heap_stats();
        assert_eq!(after.small_vcells - before.small_vcells, 4);
        assert_eq!(after.large_vcells - before.large_vcells, 100);
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut heap = heap();
        assert!(matches!(
            heap.alloc_vector(NodeKind::Integer, -1),
            Err(HeapError::NegativeLength)
        ));
    }

    #[test]
    fn test_pair_and_language_vectors_are_lists() {
        let mut heap = heap();
        let list = heap.alloc_vector(NodeKind::Pair, 3).unwrap();
        assert_eq!(heap.kind(list).unwrap(), NodeKind::Pair);
        assert_eq!(heap.length(list).unwrap(), 3);
        assert!(heap.alloc_vector(NodeKind::Language, 0).unwrap().is_nil());
        let call = heap.alloc_vector(NodeKind::Language, 2).unwrap();
        assert_eq!(heap.kind(call).unwrap(), NodeKind::Language);
        assert_eq!(heap.kind(heap.cdr(call).unwrap()).unwrap(), NodeKind::Pair);
    }

    #[test]
    fn test_reused_slot_is_zeroed() {
        let mut heap = heap();
        let v = heap.alloc_vector(NodeKind::Integer, 4).unwrap();
        heap.set_integer_elt(v, 0, 99).unwrap();
        heap.gc_full(0).unwrap();
        let w = heap.alloc_vector(NodeKind::Integer, 4).unwrap();
        assert_eq!(heap.integer_elt(w, 0).unwrap(), 0);
    }

    #[test]
    fn test_char_cache_shares_nodes() {
        let mut heap = heap();
        let a = heap.mk_char(b"hello").unwrap();
        let b = heap.mk_char(b"hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(heap.mk_char(b"").unwrap(), heap.blank_string());
        assert_ne!(heap.mk_char(b"NA").unwrap(), heap.na_string());
    }

    #[test]
    fn test_new_environment_copies_tags() {
        let mut heap = heap();
        let sym = heap.alloc_sexp(NodeKind::Symbol).unwrap();
        let _s = heap.root(sym).unwrap();
        let names = heap.cons(Handle::NIL, Handle::NIL).unwrap();
        heap.set_tag(names, sym).unwrap();
        let _n = heap.root(names).unwrap();
        let values = heap.cons(Handle::NIL, Handle::NIL).unwrap();

        let env = heap.new_environment(names, values, Handle::NIL).unwrap();

        assert_eq!(heap.frame(env).unwrap(), values);
        assert_eq!(heap.tag(values).unwrap(), sym);
    }

    #[test]
    fn test_promise_starts_unbound() {
        let mut heap = heap();
        let unbound = heap.alloc_sexp(NodeKind::Symbol).unwrap();
        heap.set_global(GlobalRoot::UnboundValue, unbound).unwrap();
        let p = heap.new_promise(Handle::NIL, Handle::NIL).unwrap();
        assert_eq!(heap.car(p).unwrap(), unbound);
    }

    #[test]
    fn test_alloc_sexp_rejects_vectors() {
        let mut heap = heap();
        assert!(heap.alloc_sexp(NodeKind::Real).is_err());
        let ext = heap.alloc_sexp(NodeKind::ExternalPtr).unwrap();
        assert_eq!(heap.external_addr(ext).unwrap(), 0);
    }
}
