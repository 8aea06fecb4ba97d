//! Reference Map - Tells the tracer which fields of a node are references
//!
//! The reference layout is fixed per node kind. The attribute list is always
//! a reference and is not part of the map.
//!
//! | kind                                                     | references          |
//! |----------------------------------------------------------|---------------------|
//! | symbol, pairlist, closure, promise, language, `...`, bytecode | tag, car, cdr  |
//! | environment                                              | frame, enclos, hashtab |
//! | externalptr                                              | prot, tag           |
//! | character, list, expression                              | every element       |
//! | everything else (data vectors, weakref, builtins, S4)    | none                |
//!
//! Weak reference records are deliberately opaque to ordinary tracing; their
//! fields are followed only by the weak reference pass.

use super::header::NodeKind;

/// Reference layout for a node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMap {
    /// No references besides attributes
    Leaf,
    /// Three cell slots
    Cell,
    /// Protected value and tag of an external pointer
    External,
    /// Every vector element
    Elements,
}

impl ReferenceMap {
    /// Layout for `kind`
    pub fn for_kind(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Symbol
            | NodeKind::Pair
            | NodeKind::Closure
            | NodeKind::Environment
            | NodeKind::Promise
            | NodeKind::Language
            | NodeKind::Dots
            | NodeKind::Bytecode => ReferenceMap::Cell,
            NodeKind::ExternalPtr => ReferenceMap::External,
            NodeKind::Str | NodeKind::List | NodeKind::Expression => ReferenceMap::Elements,
            NodeKind::Nil
            | NodeKind::Special
            | NodeKind::Builtin
            | NodeKind::WeakRef
            | NodeKind::S4
            | NodeKind::Char
            | NodeKind::Logical
            | NodeKind::Integer
            | NodeKind::Real
            | NodeKind::Complex
            | NodeKind::Raw
            | NodeKind::Free
            | NodeKind::Fresh
            | NodeKind::Peg
            | NodeKind::Vacant => ReferenceMap::Leaf,
        }
    }

    /// True if nodes with this layout can reference other nodes
    pub fn has_references(self) -> bool {
        self != ReferenceMap::Leaf
    }
}
