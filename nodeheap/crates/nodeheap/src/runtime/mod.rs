//! Runtime Module - Finalization support
//!
//! Weak reference records, the finalizer queue they form, and the hook
//! through which interpreter-level finalizers are run.

pub mod finalizer;
