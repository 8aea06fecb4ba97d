//! Finalizer - Weak reference records and finalization
//!
//! Records live on one list headed by `Heap::weak_refs`. The collector's
//! weak pass flags records whose key died as ready; ready records are
//! unlinked and their finalizers run after the collection, outside of it.
//!
//! A finalizer runs at most once: the record is unlinked and emptied
//! before the finalizer is invoked, even if the finalizer then fails.

use crate::allocator::NODE_CLASS_VCELLS;
use crate::error::{HeapError, Result};
use crate::heap::Heap;
use crate::object::{Body, Finalizer, FinalizerHook, Handle, NodeId, NodeKind, WeakRecord};

/// Size class of weak reference nodes (four vector cells)
const WEAK_REF_CLASS: usize = 3;

fn is_weak_key(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::Environment | NodeKind::ExternalPtr)
}

fn is_function(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::Closure | NodeKind::Builtin | NodeKind::Special)
}

impl Heap {
    /// Create a weak reference from `key` to `value`
    ///
    /// The key must be an environment or an external pointer. A nil key
    /// yields a record that is never registered, so its finalizer never
    /// runs. With `on_exit` the finalizer also runs at [`Heap::shutdown`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nodeheap::{Finalizer, GcConfig, Handle, Heap, NodeKind};
    ///
    /// let mut heap = Heap::new(GcConfig::default()).unwrap();
    /// let key = heap.new_external_ptr(0, Handle::NIL, Handle::NIL).unwrap();
    /// let value = heap.alloc_vector(NodeKind::Integer, 4).unwrap();
    /// let w = heap.new_weak_ref(key, value, Finalizer::None, false).unwrap();
    /// assert_eq!(heap.weak_ref_value(w).unwrap(), value);
    /// ```
    pub fn new_weak_ref(
        &mut self,
        key: Handle,
        value: Handle,
        finalizer: Finalizer,
        on_exit: bool,
    ) -> Result<Handle> {
        self.check_live()?;
        self.check_handle(value)?;
        let fun = finalizer.traced_handle();
        if !fun.is_nil() && !is_function(self.kind(fun)?) {
            return Err(HeapError::InvalidFinalizer);
        }
        if !key.is_nil() && !is_weak_key(self.kind(key)?) {
            return Err(HeapError::InvalidWeakKey);
        }

        // The list head may change while the node is allocated
        let id = self.new_weak_node(&[key, value, fun])?;
        let record = if key.is_nil() {
            WeakRecord::default()
        } else {
            WeakRecord {
                key,
                value,
                finalizer,
                next: self.weak_refs,
                ready: false,
                on_exit,
            }
        };
        let node = &mut self.nodes[id];
        node.reset(NodeKind::WeakRef, Body::Weak(Box::new(record)));
        let w = node.handle(id);
        self.stats.record_allocation();
        if !key.is_nil() {
            self.weak_refs = w;
        }
        Ok(w)
    }

    /// Attach a finalizer to `key` without a value
    pub fn register_finalizer(
        &mut self,
        key: Handle,
        finalizer: Finalizer,
        on_exit: bool,
    ) -> Result<Handle> {
        self.new_weak_ref(key, Handle::NIL, finalizer, on_exit)
    }

    fn new_weak_node(&mut self, pinned: &[Handle]) -> Result<NodeId> {
        let vcells = NODE_CLASS_VCELLS[WEAK_REF_CLASS];
        let id = self.with_pinned(pinned, |heap| {
            if heap.collector.torture_fires()
                || heap.budget.no_free_nodes()
                || heap.budget.vheap_free() < vcells
            {
                heap.gc_internal(vcells)?;
                if heap.budget.no_free_nodes() {
                    return Err(HeapError::OutOfNodes);
                }
                if heap.budget.vheap_free() < vcells {
                    return Err(HeapError::OutOfVectorSpace);
                }
            }
            heap.class_get_free_node(WEAK_REF_CLASS)
        })?;
        self.budget.small_valloc += vcells;
        Ok(id)
    }

    fn weak_record(&self, w: Handle) -> Result<&WeakRecord> {
        let id = self.resolve_kind(w, "weak reference", |k| k == NodeKind::WeakRef)?;
        match &self.nodes[id].body {
            Body::Weak(record) => Ok(record),
            _ => Err(HeapError::wrong_kind("weak reference", self.nodes[id].kind)),
        }
    }

    fn weak_record_mut(&mut self, w: Handle) -> Option<&mut WeakRecord> {
        let id = self.traceable(w)?;
        match &mut self.nodes[id].body {
            Body::Weak(record) => Some(record),
            _ => None,
        }
    }

    /// Key of a weak reference; nil once finalized
    pub fn weak_ref_key(&self, w: Handle) -> Result<Handle> {
        Ok(self.weak_record(w)?.key)
    }

    /// Value of a weak reference; nil once finalized
    pub fn weak_ref_value(&self, w: Handle) -> Result<Handle> {
        Ok(self.weak_record(w)?.value)
    }

    /// Successor of `w` on the weak list, `None` past the end
    pub(crate) fn weak_next(&self, w: Handle) -> Option<Handle> {
        let id = self.traceable(w)?;
        match &self.nodes[id].body {
            Body::Weak(record) => Some(record.next),
            _ => None,
        }
    }

    /// Key, value and traced finalizer of a listed record
    pub(crate) fn weak_fields(&self, w: Handle) -> (Handle, Handle, Handle) {
        match self.traceable(w).map(|id| &self.nodes[id].body) {
            Some(Body::Weak(record)) => {
                (record.key, record.value, record.finalizer.traced_handle())
            }
            _ => (Handle::NIL, Handle::NIL, Handle::NIL),
        }
    }

    pub(crate) fn set_weak_ready(&mut self, w: Handle) {
        if let Some(record) = self.weak_record_mut(w) {
            record.ready = true;
        }
    }

    /// Install the callback that runs interpreter-level finalizers
    pub fn set_finalizer_hook(&mut self, hook: FinalizerHook) {
        self.finalizer_hook = Some(hook);
    }

    /// Finalize `w` now
    ///
    /// Key, value and finalizer are cleared first and the record is flagged
    /// ready, so the next collection drops it from the list.
    pub fn run_weak_ref_finalizer(&mut self, w: Handle) -> Result<()> {
        self.weak_record(w)?;
        let Some(record) = self.weak_record_mut(w) else {
            return Ok(());
        };
        let (key, finalizer) = record.take_for_finalization();
        let fun = finalizer.traced_handle();
        self.with_pinned(&[key, fun], |heap| heap.invoke_finalizer(key, finalizer))
    }

    fn invoke_finalizer(&mut self, key: Handle, finalizer: Finalizer) -> Result<()> {
        let outcome = match finalizer {
            Finalizer::None => return Ok(()),
            Finalizer::Native(mut f) => f(self, key),
            Finalizer::Value(fun) if fun.is_nil() => return Ok(()),
            Finalizer::Value(fun) => match self.finalizer_hook.take() {
                Some(mut hook) => {
                    let outcome = hook(self, fun, key);
                    if self.finalizer_hook.is_none() {
                        self.finalizer_hook = Some(hook);
                    }
                    outcome
                }
                None => Err(anyhow::anyhow!("no finalizer hook installed")),
            },
        };
        self.stats.record_finalizer_run();
        outcome.map_err(|err| HeapError::FinalizerFailed {
            message: format!("{:#}", err),
        })
    }

    /// Remove `w` from the weak list
    fn unlink_weak(&mut self, w: Handle) {
        let next = self.weak_next(w).unwrap_or(Handle::NIL);
        if self.weak_refs == w {
            self.weak_refs = next;
            return;
        }
        let mut s = self.weak_refs;
        while let Some(after) = self.weak_next(s) {
            if after == w {
                if let Some(record) = self.weak_record_mut(s) {
                    record.next = next;
                }
                return;
            }
            s = after;
        }
    }

    /// Run the finalizer of every ready record
    ///
    /// Returns whether any record was finalized. A failing finalizer does
    /// not stop the others; the first failure is returned once all ran.
    /// Calls made while finalizers are already running return `Ok(false)`.
    pub fn run_pending_finalizers(&mut self) -> Result<bool> {
        if self.finalizers_running {
            return Ok(false);
        }
        let mut ready = Vec::new();
        let mut w = self.weak_refs;
        while let Some(next) = self.weak_next(w) {
            if self.weak_record_mut(w).is_some_and(|r| r.ready) {
                ready.push(w);
            }
            w = next;
        }
        if ready.is_empty() {
            return Ok(false);
        }

        self.finalizers_running = true;
        let mut first_error = None;
        for &w in &ready {
            self.unlink_weak(w);
            if let Err(err) = self.run_weak_ref_finalizer(w) {
                log::warn!("{}", err);
                first_error.get_or_insert(err);
            }
        }
        self.finalizers_running = false;

        crate::logging::log_finalizers_run(ready.len());
        match first_error {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    /// Flag every run-at-exit record ready and run pending finalizers
    pub(crate) fn run_exit_finalizers(&mut self) -> Result<bool> {
        let mut w = self.weak_refs;
        while let Some(next) = self.weak_next(w) {
            if let Some(record) = self.weak_record_mut(w) {
                if record.on_exit {
                    record.ready = true;
                }
            }
            w = next;
        }
        self.run_pending_finalizers()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GcConfig;
    use crate::error::HeapError;
    use crate::heap::Heap;
    use crate::object::{Finalizer, Handle, NodeKind};
    use std::cell::Cell;
    use std::rc::Rc;

    fn heap() -> Heap {
        Heap::new(GcConfig::default()).unwrap()
    }

    fn counter() -> (Rc<Cell<usize>>, Finalizer) {
        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let finalizer = Finalizer::native(move |_, _| {
            seen.set(seen.get() + 1);
            Ok(())
        });
        (count, finalizer)
    }

    #[test]
    fn test_key_kind_checked() {
        let mut heap = heap();
        let pair = heap.cons(Handle::NIL, Handle::NIL).unwrap();
        let err = heap
            .new_weak_ref(pair, Handle::NIL, Finalizer::None, false)
            .unwrap_err();
        assert!(matches!(err, HeapError::InvalidWeakKey));
    }

    #[test]
    fn test_finalizer_must_be_function() {
        let mut heap = heap();
        let key = heap.new_environment(Handle::NIL, Handle::NIL, Handle::NIL).unwrap();
        let not_fun = heap.alloc_vector(NodeKind::Integer, 1).unwrap();
        let err = heap
            .new_weak_ref(key, Handle::NIL, Finalizer::Value(not_fun), false)
            .unwrap_err();
        assert!(matches!(err, HeapError::InvalidFinalizer));
    }

    #[test]
    fn test_nil_key_is_not_registered() {
        let mut heap = heap();
        let w = heap
            .new_weak_ref(Handle::NIL, Handle::NIL, Finalizer::None, true)
            .unwrap();
        assert_eq!(heap.kind(w).unwrap(), NodeKind::WeakRef);
        assert!(heap.weak_refs.is_nil());
    }

    #[test]
    fn test_dead_key_runs_finalizer_once() {
        let mut heap = heap();
        let (count, finalizer) = counter();
        let key = heap.new_external_ptr(7, Handle::NIL, Handle::NIL).unwrap();
        heap.register_finalizer(key, finalizer, false).unwrap();

        heap.gc_full(0).unwrap();
        assert_eq!(count.get(), 1);
        assert!(heap.weak_refs.is_nil());

        heap.gc_full(0).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_live_key_keeps_value() {
        let mut heap = heap();
        let key = heap.new_environment(Handle::NIL, Handle::NIL, Handle::NIL).unwrap();
        let _g = heap.root(key).unwrap();
        let value = heap.alloc_vector(NodeKind::Real, 3).unwrap();
        let w = heap.new_weak_ref(key, value, Finalizer::None, false).unwrap();

        heap.gc_full(0).unwrap();
        assert!(heap.is_valid(value));
        assert_eq!(heap.weak_ref_value(w).unwrap(), value);
    }

    #[test]
    fn test_explicit_finalization_clears_record() {
        let mut heap = heap();
        let (count, finalizer) = counter();
        let key = heap.new_external_ptr(1, Handle::NIL, Handle::NIL).unwrap();
        let _g = heap.root(key).unwrap();
        let w = heap.new_weak_ref(key, key, finalizer, false).unwrap();
        let _gw = heap.root(w).unwrap();

        heap.run_weak_ref_finalizer(w).unwrap();
        assert_eq!(count.get(), 1);
        assert!(heap.weak_ref_key(w).unwrap().is_nil());
        assert!(heap.weak_ref_value(w).unwrap().is_nil());

        // Ready records leave the list at the next collection
        heap.gc_full(0).unwrap();
        assert!(heap.weak_refs.is_nil());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_failures_do_not_stop_other_finalizers() {
        let mut heap = heap();
        let (count, finalizer) = counter();
        let k1 = heap.new_external_ptr(1, Handle::NIL, Handle::NIL).unwrap();
        let k2 = heap.new_external_ptr(2, Handle::NIL, Handle::NIL).unwrap();
        let _g1 = heap.root(k1).unwrap();
        let _g2 = heap.root(k2).unwrap();
        let w1 = heap.register_finalizer(k1, finalizer, false).unwrap();
        let w2 = heap
            .register_finalizer(k2, Finalizer::native(|_, _| anyhow::bail!("boom")), false)
            .unwrap();
        // The failing record is at the head and runs first
        heap.set_weak_ready(w1);
        heap.set_weak_ready(w2);

        let err = heap.run_pending_finalizers().unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(count.get(), 1);
        assert!(heap.weak_refs.is_nil());
        assert!(!heap.run_pending_finalizers().unwrap());
    }

    #[test]
    fn test_implicit_collection_swallows_finalizer_errors() {
        let mut heap = heap();
        let key = heap.new_external_ptr(1, Handle::NIL, Handle::NIL).unwrap();
        heap.register_finalizer(key, Finalizer::native(|_, _| anyhow::bail!("boom")), false)
            .unwrap();
        heap.gc_full(0).unwrap();
        assert!(heap.weak_refs.is_nil());
    }

    #[test]
    fn test_value_finalizer_uses_hook() {
        let mut heap = heap();
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        heap.set_finalizer_hook(Box::new(move |heap, fun, key| {
            assert_eq!(heap.kind(fun)?, NodeKind::Closure);
            assert_eq!(heap.kind(key)?, NodeKind::Environment);
            seen.set(seen.get() + 1);
            Ok(())
        }));
        let fun = heap.new_closure(Handle::NIL, Handle::NIL, Handle::NIL).unwrap();
        let key = heap.new_environment(Handle::NIL, Handle::NIL, Handle::NIL).unwrap();
        heap.register_finalizer(key, Finalizer::Value(fun), false).unwrap();

        heap.gc_full(0).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_exit_finalizers_run_at_shutdown() {
        let mut heap = heap();
        let (count, finalizer) = counter();
        let (other, quiet) = counter();
        let key = heap.new_external_ptr(3, Handle::NIL, Handle::NIL).unwrap();
        let _g = heap.root(key).unwrap();
        heap.register_finalizer(key, finalizer, true).unwrap();
        heap.register_finalizer(key, quiet, false).unwrap();

        heap.shutdown().unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(other.get(), 0);
    }
}
