//! Root Registration - Where every trace starts
//!
//! Roots are starting points for marking. A node reachable from any of them
//! survives the collection.
//!
//! # Root Sources
//!
//! Scanned in this order:
//!
//! 1. **Globals** - builtin constants, the standard environments, handler
//!    and restart stacks, the symbol table, current expression, frame
//!    names, srcref
//! 2. **Contexts** - the fields of every live [`CallContext`]
//! 3. **Providers** - collaborator-owned roots ([`RootProvider`])
//! 4. **Precious list** - values kept alive by `preserve` until `release`
//! 5. **Protect stack** - the LIFO registration stack native frames use
//! 6. **Pinned** - constructor arguments held across an allocation
//! 7. **Transient arena** - head of the scratch allocation chain
//!
//! # Protect Stack
//!
//! Native code registers values it holds across an allocating call.
//! [`Heap::root`] returns a [`Rooted`] guard that pops its entry on drop;
//! the token API ([`Heap::push_root`], [`Heap::pop_roots`], ...) serves
//! callers that cannot hold guards.
//!
//! The stack keeps a reserved margin beyond its normal depth. The first
//! overflow opens the margin and reports the error, so code unwinding from
//! it can still register a few values.

use crate::error::{HeapError, Result};
use crate::heap::Heap;
use crate::object::{Handle, NodeKind};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Entries beyond the normal depth reserved for error handling
pub const PROTECT_REDZONE: usize = 1000;

/// Root categories, for statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootType {
    Global,
    Context,
    Provider,
    Precious,
    Stack,
    Pinned,
    Transient,
}

impl fmt::Display for RootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RootType::Global => "Global",
            RootType::Context => "Context",
            RootType::Provider => "Provider",
            RootType::Precious => "Precious",
            RootType::Stack => "Stack",
            RootType::Pinned => "Pinned",
            RootType::Transient => "Transient",
        };
        f.write_str(name)
    }
}

/// Interpreter globals that are always roots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalRoot {
    UnboundValue,
    RestartToken,
    MissingArg,
    GlobalEnv,
    BaseEnv,
    EmptyEnv,
    Warnings,
    HandlerStack,
    RestartStack,
    CurrentExpr,
    FrameNames,
    Srcref,
}

impl GlobalRoot {
    pub const COUNT: usize = 12;

    pub const ALL: [GlobalRoot; GlobalRoot::COUNT] = [
        GlobalRoot::UnboundValue,
        GlobalRoot::RestartToken,
        GlobalRoot::MissingArg,
        GlobalRoot::GlobalEnv,
        GlobalRoot::BaseEnv,
        GlobalRoot::EmptyEnv,
        GlobalRoot::Warnings,
        GlobalRoot::HandlerStack,
        GlobalRoot::RestartStack,
        GlobalRoot::CurrentExpr,
        GlobalRoot::FrameNames,
        GlobalRoot::Srcref,
    ];
}

/// Fields of one interpreter call frame that must stay alive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    pub promargs: Handle,
    pub callfun: Handle,
    pub sysparent: Handle,
    pub call: Handle,
    pub cloenv: Handle,
    pub conexit: Handle,
    pub handler_stack: Handle,
    pub restart_stack: Handle,
    pub srcref: Handle,
}

impl CallContext {
    fn handles(&self) -> [Handle; 9] {
        [
            self.promargs,
            self.callfun,
            self.sysparent,
            self.call,
            self.cloenv,
            self.conexit,
            self.handler_stack,
            self.restart_stack,
            self.srcref,
        ]
    }
}

/// Roots owned by a collaborator, e.g. a bytecode node stack
///
/// Providers share their state with the heap, typically through
/// `Rc<RefCell<..>>`, and report every handle they hold when asked.
pub trait RootProvider {
    fn visit_roots(&self, visit: &mut dyn FnMut(Handle));
}

impl RootProvider for Rc<RefCell<Vec<Handle>>> {
    fn visit_roots(&self, visit: &mut dyn FnMut(Handle)) {
        for &h in self.borrow().iter() {
            visit(h);
        }
    }
}

/// Identifies a registered provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(usize);

/// Position of an entry on the protect stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RootToken {
    index: usize,
}

impl RootToken {
    pub fn index(self) -> usize {
        self.index
    }

    pub fn from_index(index: usize) -> Self {
        RootToken { index }
    }
}

struct ProtectStack {
    /// Handle plus the serial of the registration; serial 0 marks a slot
    /// vacated by an out-of-order guard drop
    entries: Vec<(Handle, u64)>,
    limit: usize,
    normal_limit: usize,
    real_limit: usize,
    next_serial: u64,
}

impl ProtectStack {
    fn push(&mut self, h: Handle) -> Result<(usize, u64)> {
        if self.entries.len() >= self.limit {
            if self.limit < self.real_limit {
                self.limit = self.real_limit;
            }
            log::warn!("protect stack overflow at depth {}", self.entries.len());
            return Err(HeapError::ProtectionStackOverflow);
        }
        self.next_serial += 1;
        self.entries.push((h, self.next_serial));
        Ok((self.entries.len() - 1, self.next_serial))
    }

    fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
        if self.limit != self.normal_limit && self.entries.len() < self.normal_limit {
            self.limit = self.normal_limit;
        }
    }

    /// Current slot of the registration pushed at `index` with `serial`
    ///
    /// Entries only ever move down (when `unprotect_value` removes one below
    /// them), so the search is bounded by the original index.
    fn locate(&self, index: usize, serial: u64) -> Option<usize> {
        if self.entries.get(index).map(|e| e.1) == Some(serial) {
            return Some(index);
        }
        let end = index.min(self.entries.len());
        self.entries[..end].iter().rposition(|e| e.1 == serial)
    }

    fn drop_guard(&mut self, index: usize, serial: u64) {
        let Some(index) = self.locate(index, serial) else {
            return;
        };
        if index + 1 == self.entries.len() {
            let mut len = index;
            while len > 0 && self.entries[len - 1].1 == 0 {
                len -= 1;
            }
            self.truncate(len);
        } else {
            self.entries[index] = (Handle::NIL, 0);
        }
    }
}

/// Shared handle to the protect stack
#[derive(Clone)]
pub(crate) struct RootStack(Rc<RefCell<ProtectStack>>);

impl RootStack {
    fn new(size: usize) -> Self {
        RootStack(Rc::new(RefCell::new(ProtectStack {
            entries: Vec::new(),
            limit: size,
            normal_limit: size,
            real_limit: size + PROTECT_REDZONE,
            next_serial: 0,
        })))
    }

    pub(crate) fn depth(&self) -> usize {
        self.0.borrow().entries.len()
    }

    pub(crate) fn limit(&self) -> usize {
        self.0.borrow().limit
    }
}

/// Scoped root registration
///
/// Pops its protect stack entry when dropped. Dropping guards out of order
/// is allowed: the entry is cleared and its slot reclaimed once the
/// entries above it are gone. A guard whose entry was already popped
/// through the token API does nothing.
pub struct Rooted {
    stack: RootStack,
    index: usize,
    serial: u64,
    handle: Cell<Handle>,
}

impl Rooted {
    /// The protected value
    pub fn handle(&self) -> Handle {
        self.handle.get()
    }

    /// Replace the protected value in place
    pub fn set(&self, h: Handle) {
        let mut stack = self.stack.0.borrow_mut();
        if let Some(index) = stack.locate(self.index, self.serial) {
            stack.entries[index].0 = h;
        }
        self.handle.set(h);
    }

    /// Token for the guard's current slot
    pub fn token(&self) -> RootToken {
        let index = self
            .stack
            .0
            .borrow()
            .locate(self.index, self.serial)
            .unwrap_or(self.index);
        RootToken { index }
    }
}

impl Drop for Rooted {
    fn drop(&mut self) {
        self.stack.0.borrow_mut().drop_guard(self.index, self.serial);
    }
}

impl fmt::Debug for Rooted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rooted({:?} @ {})", self.handle.get(), self.index)
    }
}

/// Keeps a [`CallContext`] on the context chain while alive
pub struct ContextGuard {
    contexts: Rc<RefCell<Vec<CallContext>>>,
    depth: usize,
}

impl ContextGuard {
    /// Replace the fields of this frame's context
    pub fn update(&self, context: CallContext) {
        if let Some(slot) = self.contexts.borrow_mut().get_mut(self.depth) {
            *slot = context;
        }
    }

    pub fn context(&self) -> Option<CallContext> {
        self.contexts.borrow().get(self.depth).copied()
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.contexts.borrow_mut().truncate(self.depth);
    }
}

/// Root counts from the last scan
#[derive(Debug, Default, Clone)]
pub struct RootStats {
    pub global_roots: usize,
    pub context_roots: usize,
    pub provider_roots: usize,
    pub precious_roots: usize,
    pub stack_roots: usize,
    pub pinned_roots: usize,
    /// Non-nil handles among all of the above
    pub live_roots: usize,
}

impl RootStats {
    fn count(&mut self, root_type: RootType) {
        match root_type {
            RootType::Global => self.global_roots += 1,
            RootType::Context => self.context_roots += 1,
            RootType::Provider => self.provider_roots += 1,
            RootType::Precious => self.precious_roots += 1,
            RootType::Stack => self.stack_roots += 1,
            RootType::Pinned => self.pinned_roots += 1,
            RootType::Transient => {}
        }
    }

    pub fn total(&self) -> usize {
        self.global_roots
            + self.context_roots
            + self.provider_roots
            + self.precious_roots
            + self.stack_roots
            + self.pinned_roots
    }
}

impl fmt::Display for RootStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RootStats {{ global: {}, context: {}, provider: {}, precious: {}, stack: {}, pinned: {}, live: {} }}",
            self.global_roots,
            self.context_roots,
            self.provider_roots,
            self.precious_roots,
            self.stack_roots,
            self.pinned_roots,
            self.live_roots
        )
    }
}

/// Every root source of one heap
pub(crate) struct RootSet {
    pub(crate) stack: RootStack,
    contexts: Rc<RefCell<Vec<CallContext>>>,
    globals: [Handle; GlobalRoot::COUNT],
    symbols: Vec<Handle>,
    providers: Vec<(ProviderId, Box<dyn RootProvider>)>,
    next_provider: usize,
    precious: Vec<Handle>,
    /// Arguments of a constructor that may collect before it links them
    pub(crate) pinned: Vec<Handle>,
    /// Head of the transient arena chain
    pub(crate) transient: Handle,
    pub(crate) last_scan: RootStats,
}

impl RootSet {
    pub(crate) fn new(stack_size: usize) -> Self {
        Self {
            stack: RootStack::new(stack_size),
            contexts: Rc::new(RefCell::new(Vec::new())),
            globals: [Handle::NIL; GlobalRoot::COUNT],
            symbols: Vec::new(),
            providers: Vec::new(),
            next_provider: 0,
            precious: Vec::new(),
            pinned: Vec::new(),
            transient: Handle::NIL,
            last_scan: RootStats::default(),
        }
    }

    /// Append every root, in scan order, to `out`
    pub(crate) fn collect(&mut self, out: &mut Vec<Handle>) {
        let mut stats = RootStats::default();
        let mut add = |h: Handle, root_type: RootType, stats: &mut RootStats| {
            stats.count(root_type);
            if !h.is_nil() {
                stats.live_roots += 1;
                out.push(h);
            }
        };

        for &h in self.globals.iter().chain(self.symbols.iter()) {
            add(h, RootType::Global, &mut stats);
        }
        for context in self.contexts.borrow().iter() {
            for h in context.handles() {
                add(h, RootType::Context, &mut stats);
            }
        }
        for (_, provider) in &self.providers {
            provider.visit_roots(&mut |h| add(h, RootType::Provider, &mut stats));
        }
        for &h in &self.precious {
            add(h, RootType::Precious, &mut stats);
        }
        for &(h, _) in self.stack.0.borrow().entries.iter() {
            add(h, RootType::Stack, &mut stats);
        }
        for &h in &self.pinned {
            add(h, RootType::Pinned, &mut stats);
        }
        add(self.transient, RootType::Transient, &mut stats);

        self.last_scan = stats;
    }

    pub(crate) fn clear(&mut self) {
        self.stack.0.borrow_mut().truncate(0);
        self.contexts.borrow_mut().clear();
        self.globals = [Handle::NIL; GlobalRoot::COUNT];
        self.symbols.clear();
        self.providers.clear();
        self.precious.clear();
        self.pinned.clear();
        self.transient = Handle::NIL;
    }
}

impl Heap {
    /// Register `h` on the protect stack
    pub fn push_root(&mut self, h: Handle) -> Result<RootToken> {
        self.check_live()?;
        self.check_handle(h)?;
        let (index, _) = self.roots.stack.0.borrow_mut().push(h)?;
        Ok(RootToken { index })
    }

    /// Register `h` and return a guard that unregisters it on drop
    pub fn root(&mut self, h: Handle) -> Result<Rooted> {
        self.check_live()?;
        self.check_handle(h)?;
        let (index, serial) = self.roots.stack.0.borrow_mut().push(h)?;
        Ok(Rooted {
            stack: self.roots.stack.clone(),
            index,
            serial,
            handle: Cell::new(h),
        })
    }

    /// Pop the `n` most recent entries
    pub fn pop_roots(&mut self, n: usize) -> Result<()> {
        let mut stack = self.roots.stack.0.borrow_mut();
        let available = stack.entries.len();
        if n > available {
            return Err(HeapError::ProtectionStackUnderflow { available });
        }
        stack.truncate(available - n);
        Ok(())
    }

    /// Pop the entry at `token` and everything pushed after it
    pub fn pop_root(&mut self, token: RootToken) -> Result<()> {
        let mut stack = self.roots.stack.0.borrow_mut();
        let available = stack.entries.len();
        if token.index >= available {
            return Err(HeapError::ProtectionStackUnderflow { available });
        }
        stack.truncate(token.index);
        Ok(())
    }

    /// Remove the most recent registration of `h`
    ///
    /// Later entries shift down by one; their guards follow them.
    pub fn unprotect_value(&mut self, h: Handle) -> Result<()> {
        let mut stack = self.roots.stack.0.borrow_mut();
        let pos = stack
            .entries
            .iter()
            .rposition(|&(e, serial)| e == h && serial != 0)
            .ok_or(HeapError::NotProtected)?;
        stack.entries.remove(pos);
        let len = stack.entries.len();
        stack.truncate(len);
        Ok(())
    }

    /// Replace the value registered at `token`
    pub fn reprotect(&mut self, h: Handle, token: RootToken) -> Result<()> {
        self.check_handle(h)?;
        let mut stack = self.roots.stack.0.borrow_mut();
        let available = stack.entries.len();
        match stack.entries.get_mut(token.index) {
            Some(entry) => {
                entry.0 = h;
                Ok(())
            }
            None => Err(HeapError::InvalidArgument(format!(
                "only {} protected items, can't reprotect index {}",
                available, token.index
            ))),
        }
    }

    /// Pop everything from `token` up and return it as a list vector,
    /// newest first
    pub fn collect_from_index(&mut self, token: RootToken) -> Result<Handle> {
        let top = self.roots.stack.depth();
        let start = token.index.min(top);
        // Entries stay registered while the result is allocated
        let list = self.alloc_vector(NodeKind::List, (top - start) as i64)?;
        let handles: Vec<Handle> = self.roots.stack.0.borrow().entries[start..top]
            .iter()
            .rev()
            .map(|&(h, _)| h)
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            self.set_vector_elt(list, i, h)?;
        }
        self.roots.stack.0.borrow_mut().truncate(start);
        Ok(list)
    }

    /// Current protect stack depth
    pub fn protect_depth(&self) -> usize {
        self.roots.stack.depth()
    }

    /// Keep `h` alive until a matching [`Heap::release`]
    pub fn preserve(&mut self, h: Handle) -> Result<()> {
        self.check_live()?;
        self.check_handle(h)?;
        self.roots.precious.push(h);
        Ok(())
    }

    /// Drop the most recent preservation of `h`; unknown values are ignored
    pub fn release(&mut self, h: Handle) {
        if let Some(pos) = self.roots.precious.iter().rposition(|&p| p == h) {
            self.roots.precious.remove(pos);
        }
    }

    /// Push a call context; its fields are roots until the guard drops
    pub fn enter_context(&mut self, context: CallContext) -> ContextGuard {
        let mut contexts = self.roots.contexts.borrow_mut();
        let depth = contexts.len();
        contexts.push(context);
        ContextGuard {
            contexts: self.roots.contexts.clone(),
            depth,
        }
    }

    pub fn context_depth(&self) -> usize {
        self.roots.contexts.borrow().len()
    }

    pub fn set_global(&mut self, root: GlobalRoot, h: Handle) -> Result<()> {
        self.check_handle(h)?;
        self.roots.globals[root as usize] = h;
        Ok(())
    }

    pub fn global(&self, root: GlobalRoot) -> Handle {
        self.roots.globals[root as usize]
    }

    /// Add a symbol table entry; symbols are never collected
    pub fn register_symbol(&mut self, h: Handle) -> Result<()> {
        self.check_handle(h)?;
        self.roots.symbols.push(h);
        Ok(())
    }

    pub fn add_root_provider(&mut self, provider: Box<dyn RootProvider>) -> ProviderId {
        let id = ProviderId(self.roots.next_provider);
        self.roots.next_provider += 1;
        self.roots.providers.push((id, provider));
        id
    }

    pub fn remove_root_provider(&mut self, id: ProviderId) -> Option<Box<dyn RootProvider>> {
        let pos = self.roots.providers.iter().position(|(p, _)| *p == id)?;
        Some(self.roots.providers.remove(pos).1)
    }

    /// Root counts seen by the most recent collection
    pub fn root_stats(&self) -> RootStats {
        self.roots.last_scan.clone()
    }

    /// Forward every root
    pub(crate) fn forward_roots(&mut self) {
        let mut scratch = std::mem::take(&mut self.root_scratch);
        scratch.clear();
        scratch.push(self.na_string);
        scratch.push(self.blank_string);
        self.roots.collect(&mut scratch);
        for &h in &scratch {
            self.forward_node(h);
        }
        self.root_scratch = scratch;
    }
}
