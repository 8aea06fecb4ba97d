//! C entry points
//!
//! Each thread owns at most one heap, created by [`nh_init`]. Handles cross
//! the boundary as their `u64` bit pattern, `0` being nil. A failing call
//! stores its message in a thread-local slot readable through
//! [`nh_last_error`] and returns nil, `false`, null or `-1`.
//!
//! The heap is borrowed for the duration of a call. C finalizers are
//! therefore queued while it is borrowed and invoked once the call has
//! released it, so they may allocate through this API. Their keys stay
//! preserved until the callback returns.

use libc::{c_char, c_int};
use nodeheap::{Finalizer, GcConfig, Handle, Heap, HeapError, NodeKind, TransientMark};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::CString;

/// Native finalizer, called with the key's handle bits
///
/// It runs after the API call that triggered it has returned the heap, so
/// it may call back into any `nh_*` function. During [`nh_shutdown`] the
/// heap is already gone and such calls fail.
pub type NhFinalizer = extern "C" fn(u64);

thread_local! {
    static HEAP: RefCell<Option<Heap>> = RefCell::new(None);
    static LAST_ERROR: RefCell<Option<CString>> = RefCell::new(None);
    static PENDING_C_FINALIZERS: RefCell<VecDeque<(NhFinalizer, u64)>> =
        RefCell::new(VecDeque::new());
}

/// Invoke queued C finalizers, releasing each key afterwards
fn drain_c_finalizers() {
    while let Some((fun, key)) = PENDING_C_FINALIZERS.with(|q| q.borrow_mut().pop_front()) {
        fun(key);
        HEAP.with(|cell| {
            if let Ok(mut slot) = cell.try_borrow_mut() {
                if let Some(heap) = slot.as_mut() {
                    heap.release(Handle::from_bits(key));
                }
            }
        });
    }
}

fn set_last_error(message: String) {
    log::debug!("nodeheap call failed: {}", message);
    let c = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(c));
}

/// Run `f` on this thread's heap, mapping failures to `fallback`, then
/// invoke any C finalizers it made ready
fn with_heap<T>(fallback: T, f: impl FnOnce(&mut Heap) -> nodeheap::Result<T>) -> T {
    let result = borrow_heap(fallback, f);
    drain_c_finalizers();
    result
}

fn borrow_heap<T>(fallback: T, f: impl FnOnce(&mut Heap) -> nodeheap::Result<T>) -> T {
    HEAP.with(|cell| {
        let mut guard = match cell.try_borrow_mut() {
            Ok(guard) => guard,
            Err(_) => {
                set_last_error("heap busy: re-entered from a finalizer".to_string());
                return fallback;
            }
        };
        let heap = match guard.as_mut() {
            Some(heap) => heap,
            None => {
                set_last_error("heap not initialized".to_string());
                return fallback;
            }
        };
        match f(heap) {
            Ok(v) => v,
            Err(e) => {
                set_last_error(e.to_string());
                fallback
            }
        }
    })
}

/// Node kind for an interpreter type code
fn kind_from_code(code: u32) -> Option<NodeKind> {
    Some(match code {
        1 => NodeKind::Symbol,
        2 => NodeKind::Pair,
        3 => NodeKind::Closure,
        4 => NodeKind::Environment,
        5 => NodeKind::Promise,
        6 => NodeKind::Language,
        7 => NodeKind::Special,
        8 => NodeKind::Builtin,
        9 => NodeKind::Char,
        10 => NodeKind::Logical,
        13 => NodeKind::Integer,
        14 => NodeKind::Real,
        15 => NodeKind::Complex,
        16 => NodeKind::Str,
        17 => NodeKind::Dots,
        19 => NodeKind::List,
        20 => NodeKind::Expression,
        21 => NodeKind::Bytecode,
        22 => NodeKind::ExternalPtr,
        23 => NodeKind::WeakRef,
        24 => NodeKind::Raw,
        25 => NodeKind::S4,
        _ => return None,
    })
}

/// Create this thread's heap
///
/// Settings come from the `NODEHEAP_*` environment; non-zero arguments
/// override the initial cell and vector-byte budgets. Calling it again
/// while a heap exists succeeds without changes.
#[no_mangle]
pub extern "C" fn nh_init(initial_cells: usize, initial_vector_bytes: usize) -> bool {
    HEAP.with(|cell| {
        let mut slot = match cell.try_borrow_mut() {
            Ok(slot) => slot,
            Err(_) => {
                set_last_error("heap busy: re-entered from a finalizer".to_string());
                return false;
            }
        };
        if slot.is_some() {
            return true;
        }
        let mut config = GcConfig::from_env();
        if initial_cells != 0 {
            config.initial_cells = initial_cells;
        }
        if initial_vector_bytes != 0 {
            config.initial_vector_bytes = initial_vector_bytes;
        }
        match Heap::new(config) {
            Ok(heap) => {
                *slot = Some(heap);
                true
            }
            Err(e) => {
                set_last_error(e.to_string());
                false
            }
        }
    })
}

/// Run exit finalizers and drop this thread's heap
#[no_mangle]
pub extern "C" fn nh_shutdown() -> bool {
    let heap = HEAP.with(|cell| cell.try_borrow_mut().ok().and_then(|mut slot| slot.take()));
    let done = match heap {
        Some(mut heap) => match heap.shutdown() {
            Ok(()) => true,
            Err(e) => {
                set_last_error(e.to_string());
                false
            }
        },
        None => {
            set_last_error("heap not initialized or busy".to_string());
            false
        }
    };
    drain_c_finalizers();
    done
}

/// Allocate a vector of the given type code and length
#[no_mangle]
pub extern "C" fn nh_alloc_vector(code: u32, length: i64) -> u64 {
    with_heap(0, |heap| {
        let kind = kind_from_code(code).ok_or_else(|| {
            HeapError::InvalidArgument(format!("unknown type code {}", code))
        })?;
        Ok(heap.alloc_vector(kind, length)?.to_bits())
    })
}

#[no_mangle]
pub extern "C" fn nh_cons(car: u64, cdr: u64) -> u64 {
    with_heap(0, |heap| {
        Ok(heap
            .cons(Handle::from_bits(car), Handle::from_bits(cdr))?
            .to_bits())
    })
}

/// Push a value on the protect stack; returns its stack index or `-1`
#[no_mangle]
pub extern "C" fn nh_protect(h: u64) -> c_int {
    with_heap(-1, |heap| {
        let token = heap.push_root(Handle::from_bits(h))?;
        Ok(c_int::try_from(token.index()).unwrap_or(c_int::MAX))
    })
}

/// Pop `n` protect stack entries
#[no_mangle]
pub extern "C" fn nh_unprotect(n: c_int) -> bool {
    with_heap(false, |heap| {
        heap.pop_roots(usize::try_from(n).unwrap_or(0))?;
        Ok(true)
    })
}

/// Remove the topmost protect stack entry holding `h`
#[no_mangle]
pub extern "C" fn nh_unprotect_ptr(h: u64) -> bool {
    with_heap(false, |heap| {
        heap.unprotect_value(Handle::from_bits(h))?;
        Ok(true)
    })
}

/// Keep `h` alive until [`nh_release`]
#[no_mangle]
pub extern "C" fn nh_preserve(h: u64) -> bool {
    with_heap(false, |heap| {
        heap.preserve(Handle::from_bits(h))?;
        Ok(true)
    })
}

#[no_mangle]
pub extern "C" fn nh_release(h: u64) -> bool {
    with_heap(false, |heap| {
        heap.release(Handle::from_bits(h));
        Ok(true)
    })
}

/// Run a collection at the scheduled level
#[no_mangle]
pub extern "C" fn nh_gc() -> bool {
    with_heap(false, |heap| {
        heap.collect(0, 0)?;
        Ok(true)
    })
}

/// Collect every generation
#[no_mangle]
pub extern "C" fn nh_gc_full() -> bool {
    with_heap(false, |heap| {
        heap.gc_full(0)?;
        Ok(true)
    })
}

/// Current transient arena mark
#[no_mangle]
pub extern "C" fn nh_vmaxget() -> u64 {
    with_heap(0, |heap| Ok(heap.begin_transient_scope().handle().to_bits()))
}

/// Rewind the transient arena to a mark from [`nh_vmaxget`]
#[no_mangle]
pub extern "C" fn nh_vmaxset(mark: u64) -> bool {
    with_heap(false, |heap| {
        heap.end_transient_scope(TransientMark::from_handle(Handle::from_bits(mark)));
        Ok(true)
    })
}

/// Scratch memory for `n` elements of `size` bytes on the transient arena
///
/// The block stays valid until the arena is rewound past it and a
/// collection runs. Empty requests return null without an error.
#[no_mangle]
pub extern "C" fn nh_r_alloc(n: usize, size: usize) -> *mut c_char {
    with_heap(std::ptr::null_mut(), |heap| {
        let block = heap.transient_alloc(n, size)?;
        if block.is_nil() {
            return Ok(std::ptr::null_mut());
        }
        Ok(heap.vector_bytes_mut(block)?.as_mut_ptr().cast::<c_char>())
    })
}

/// Register `fun` to run once `key` becomes unreachable
///
/// With `on_exit` the finalizer also runs at [`nh_shutdown`] if the key is
/// still alive.
#[no_mangle]
pub extern "C" fn nh_register_c_finalizer(
    key: u64,
    fun: Option<NhFinalizer>,
    on_exit: bool,
) -> bool {
    with_heap(false, |heap| {
        let fun = fun.ok_or(HeapError::InvalidFinalizer)?;
        let finalizer = Finalizer::native(move |heap, key| {
            heap.preserve(key)?;
            PENDING_C_FINALIZERS.with(|q| q.borrow_mut().push_back((fun, key.to_bits())));
            Ok(())
        });
        heap.register_finalizer(Handle::from_bits(key), finalizer, on_exit)?;
        Ok(true)
    })
}

/// Run ready finalizers; `true` if any ran
#[no_mangle]
pub extern "C" fn nh_run_finalizers() -> bool {
    with_heap(false, |heap| heap.run_pending_finalizers())
}

/// Message of the last failed call on this thread, or null
///
/// The pointer stays valid until the next failing call on the thread.
#[no_mangle]
pub extern "C" fn nh_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |msg| msg.as_ptr())
    })
}
