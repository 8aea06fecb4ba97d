//! Node Header - Metadata for heap-managed nodes
//!
//! Every arena slot holds one [`Node`]: a small fixed header followed by the
//! node body.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ stamp        reuse counter (see Handle)      │
//! │ kind         type tag                        │
//! │ marked, gen  mark bit and generation id      │
//! │ class        size class id (0..=7)           │
//! │ next, prev   intrusive list links            │
//! │ attrib       attribute list                  │
//! │ home         page slot / large block / peg   │
//! ├──────────────────────────────────────────────┤
//! │ body         three slots, or a vector header │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Small vector payloads live in their page; large payloads live in a block
//! owned by the body.

use super::handle::{Handle, NodeId, PageId};
use super::weak::WeakRecord;
use serde::Serialize;
use std::fmt;

/// Node type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeKind {
    /// Kind reported for `Handle::NIL`; no node carries it
    Nil,
    Symbol,
    Pair,
    Closure,
    Environment,
    Promise,
    Language,
    Dots,
    Special,
    Builtin,
    Bytecode,
    ExternalPtr,
    WeakRef,
    S4,
    Char,
    Logical,
    Integer,
    Real,
    Complex,
    Str,
    List,
    Expression,
    Raw,
    /// Reclaimed node, retyped by debug checks
    Free,
    /// On a page but never handed out
    Fresh,
    /// List anchor
    Peg,
    /// Arena slot not backed by a page
    Vacant,
}

impl NodeKind {
    /// Every kind a mutator can allocate
    pub const ALLOCATABLE: [NodeKind; 22] = [
        NodeKind::Symbol,
        NodeKind::Pair,
        NodeKind::Closure,
        NodeKind::Environment,
        NodeKind::Promise,
        NodeKind::Language,
        NodeKind::Dots,
        NodeKind::Special,
        NodeKind::Builtin,
        NodeKind::Bytecode,
        NodeKind::ExternalPtr,
        NodeKind::WeakRef,
        NodeKind::S4,
        NodeKind::Char,
        NodeKind::Logical,
        NodeKind::Integer,
        NodeKind::Real,
        NodeKind::Complex,
        NodeKind::Str,
        NodeKind::List,
        NodeKind::Expression,
        NodeKind::Raw,
    ];

    /// Interpreter-facing type name
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Nil => "NULL",
            NodeKind::Symbol => "symbol",
            NodeKind::Pair => "pairlist",
            NodeKind::Closure => "closure",
            NodeKind::Environment => "environment",
            NodeKind::Promise => "promise",
            NodeKind::Language => "language",
            NodeKind::Dots => "...",
            NodeKind::Special => "special",
            NodeKind::Builtin => "builtin",
            NodeKind::Bytecode => "bytecode",
            NodeKind::ExternalPtr => "externalptr",
            NodeKind::WeakRef => "weakref",
            NodeKind::S4 => "S4",
            NodeKind::Char => "char",
            NodeKind::Logical => "logical",
            NodeKind::Integer => "integer",
            NodeKind::Real => "double",
            NodeKind::Complex => "complex",
            NodeKind::Str => "character",
            NodeKind::List => "list",
            NodeKind::Expression => "expression",
            NodeKind::Raw => "raw",
            NodeKind::Free => "FREESXP",
            NodeKind::Fresh => "NEWSXP",
            NodeKind::Peg => "peg",
            NodeKind::Vacant => "vacant",
        }
    }

    /// Bytes per element for vector kinds, `None` for everything else
    pub fn element_bytes(self) -> Option<usize> {
        match self {
            NodeKind::Raw | NodeKind::Char => Some(1),
            NodeKind::Logical | NodeKind::Integer => Some(4),
            NodeKind::Real => Some(8),
            NodeKind::Complex => Some(16),
            NodeKind::Str | NodeKind::List | NodeKind::Expression => Some(8),
            _ => None,
        }
    }

    /// Vector kinds whose elements are handles
    pub fn holds_handles(self) -> bool {
        matches!(self, NodeKind::Str | NodeKind::List | NodeKind::Expression)
    }

    /// Kinds with a tag/car/cdr cell body
    pub fn is_cell(self) -> bool {
        matches!(
            self,
            NodeKind::Symbol
                | NodeKind::Pair
                | NodeKind::Closure
                | NodeKind::Environment
                | NodeKind::Promise
                | NodeKind::Language
                | NodeKind::Dots
                | NodeKind::Bytecode
        )
    }

    /// Kinds a live handle may legitimately name
    pub(crate) fn is_live_kind(self) -> bool {
        !matches!(
            self,
            NodeKind::Nil | NodeKind::Free | NodeKind::Fresh | NodeKind::Peg | NodeKind::Vacant
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a node's storage comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Home {
    Page { page: PageId, slot: u32 },
    Large,
    Peg,
    Detached,
}

/// Node payload
pub(crate) enum Body {
    Empty,
    /// car, cdr, tag; frame, enclos, hashtab for environments
    Cell([Handle; 3]),
    External { addr: usize, prot: Handle, tag: Handle },
    Primitive(u32),
    /// Small payloads are in the page; large ones are owned here
    Vector { length: usize, large: Option<Box<[u8]>> },
    Weak(Box<WeakRecord>),
}

impl Body {
    pub(crate) fn vector_length(&self) -> Option<usize> {
        match self {
            Body::Vector { length, .. } => Some(*length),
            _ => None,
        }
    }
}

/// One arena slot
pub(crate) struct Node {
    pub(crate) stamp: u32,
    pub(crate) kind: NodeKind,
    /// Kind before debug checks retyped the node `Free`
    pub(crate) prior_kind: NodeKind,
    pub(crate) marked: bool,
    pub(crate) gen: u8,
    pub(crate) class: u8,
    pub(crate) next: NodeId,
    pub(crate) prev: NodeId,
    pub(crate) attrib: Handle,
    pub(crate) home: Home,
    pub(crate) body: Body,
}

impl Node {
    pub(crate) fn vacant() -> Self {
        Node {
            stamp: 0,
            kind: NodeKind::Vacant,
            prior_kind: NodeKind::Vacant,
            marked: false,
            gen: 0,
            class: 0,
            next: NodeId::INVALID,
            prev: NodeId::INVALID,
            attrib: Handle::NIL,
            home: Home::Detached,
            body: Body::Empty,
        }
    }

    pub(crate) fn peg(id: NodeId, class: u8) -> Self {
        Node {
            kind: NodeKind::Peg,
            prior_kind: NodeKind::Peg,
            class,
            next: id,
            prev: id,
            home: Home::Peg,
            ..Node::vacant()
        }
    }

    /// Header reset applied when a slot is handed out: unmarked,
    /// generation 0, no attributes.
    pub(crate) fn reset(&mut self, kind: NodeKind, body: Body) {
        self.kind = kind;
        self.prior_kind = kind;
        self.marked = false;
        self.gen = 0;
        self.attrib = Handle::NIL;
        self.body = body;
    }

    pub(crate) fn handle(&self, id: NodeId) -> Handle {
        Handle::new(id, self.stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(NodeKind::Raw.element_bytes(), Some(1));
        assert_eq!(NodeKind::Integer.element_bytes(), Some(4));
        assert_eq!(NodeKind::Complex.element_bytes(), Some(16));
        assert_eq!(NodeKind::Str.element_bytes(), Some(8));
        assert_eq!(NodeKind::Pair.element_bytes(), None);
    }

    #[test]
    fn test_peg_links_to_itself() {
        let id = NodeId(4);
        let peg = Node::peg(id, 3);
        assert_eq!(peg.next, id);
        assert_eq!(peg.prev, id);
        assert_eq!(peg.class, 3);
        assert!(!peg.kind.is_live_kind());
    }

    #[test]
    fn test_display_uses_type_names() {
        assert_eq!(NodeKind::Real.to_string(), "double");
        assert_eq!(NodeKind::Free.to_string(), "FREESXP");
    }
}
