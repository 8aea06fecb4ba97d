//! Util Module - Heap inspection helpers

pub mod debug;

pub use debug::ClassCounts;
