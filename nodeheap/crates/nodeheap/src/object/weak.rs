//! Weak References Support
//!
//! A weak reference record associates a key with a value and a finalizer
//! without the key keeping either of them alive. Records form one singly
//! linked list owned by the heap; ordinary tracing does not look inside a
//! record, the weak pass after tracing does:
//!
//! - key reachable: value and finalizer are forwarded as well (repeated to
//!   a fixpoint, since forwarding a value can make another key reachable)
//! - key unreachable: the record becomes ready to finalize
//!
//! Lifecycle of a record: unprocessed → ready-to-finalize → finalized
//! (unlinked, key/value/finalizer cleared).

use super::handle::Handle;
use crate::heap::Heap;
use std::fmt;

/// Native finalizer closure, called with the record's key
pub type NativeFinalizer = Box<dyn FnMut(&mut Heap, Handle) -> anyhow::Result<()>>;

/// Callback that runs interpreter-level finalizer functions.
///
/// Receives the function value and the key. Installed with
/// [`Heap::set_finalizer_hook`].
pub type FinalizerHook = Box<dyn FnMut(&mut Heap, Handle, Handle) -> anyhow::Result<()>>;

/// What runs when a key becomes unreachable
pub enum Finalizer {
    /// Nothing runs; the record only tracks reachability
    None,
    /// An interpreter function (closure, builtin or special), run via the
    /// installed [`FinalizerHook`]
    Value(Handle),
    /// A native closure
    Native(NativeFinalizer),
}

impl Finalizer {
    /// Wrap a native closure
    pub fn native<F>(f: F) -> Self
    where
        F: FnMut(&mut Heap, Handle) -> anyhow::Result<()> + 'static,
    {
        Finalizer::Native(Box::new(f))
    }

    /// Heap value the finalizer keeps alive, if any
    pub(crate) fn traced_handle(&self) -> Handle {
        match self {
            Finalizer::Value(h) => *h,
            Finalizer::None | Finalizer::Native(_) => Handle::NIL,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Finalizer::None)
    }
}

impl Default for Finalizer {
    fn default() -> Self {
        Finalizer::None
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finalizer::None => write!(f, "Finalizer::None"),
            Finalizer::Value(h) => write!(f, "Finalizer::Value({:?})", h),
            Finalizer::Native(_) => write!(f, "Finalizer::Native(..)"),
        }
    }
}

/// Body of a weak reference node
#[derive(Debug, Default)]
pub(crate) struct WeakRecord {
    pub(crate) key: Handle,
    pub(crate) value: Handle,
    pub(crate) finalizer: Finalizer,
    pub(crate) next: Handle,
    pub(crate) ready: bool,
    pub(crate) on_exit: bool,
}

impl WeakRecord {
    /// Drop key, value and finalizer, returning what is needed to run the
    /// finalizer once.
    pub(crate) fn take_for_finalization(&mut self) -> (Handle, Finalizer) {
        let key = std::mem::replace(&mut self.key, Handle::NIL);
        self.value = Handle::NIL;
        let finalizer = std::mem::take(&mut self.finalizer);
        self.ready = true;
        (key, finalizer)
    }
}
