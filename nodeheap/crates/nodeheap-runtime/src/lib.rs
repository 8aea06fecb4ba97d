//! nodeheap Runtime Library
//!
//! C ABI over a per-thread [`nodeheap::Heap`] for interpreters written
//! outside Rust:
//! - heap lifecycle and collection entry points
//! - vector and pair constructors
//! - protect stack, precious list and transient arena
//! - native finalizers on weak keys

mod ffi;

pub use ffi::*;
