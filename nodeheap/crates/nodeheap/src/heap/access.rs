//! Node Accessors - Reads and barrier-checked writes
//!
//! Every handle is checked against its slot's stamp before use, so a handle
//! kept past the life of its node fails with `StaleHandle` instead of
//! reading whatever reused the slot. In debug mode a reclaimed node is
//! retyped `Free` and reading it reports `CorruptNode`.
//!
//! All pointer stores go through the write barrier before the store.

use super::Heap;
use crate::error::{HeapError, Result};
use crate::object::{Body, Handle, Home, NodeId, NodeKind};
use serde::Serialize;

/// Header fields of a node, for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub kind: NodeKind,
    pub class: u8,
    pub generation: u8,
    pub marked: bool,
}

/// Cell slot indices
const CAR: usize = 0;
const CDR: usize = 1;
const TAG: usize = 2;

impl Heap {
    /// Slot of a live, non-nil handle
    pub(crate) fn resolve(&self, h: Handle) -> Result<NodeId> {
        self.check_live()?;
        if h.is_nil() {
            return Err(HeapError::wrong_kind("node", NodeKind::Nil));
        }
        let stale = || HeapError::StaleHandle {
            index: h.index(),
            stamp: h.stamp(),
        };
        let node = self.nodes.get(h.id()).ok_or_else(stale)?;
        if node.stamp != h.stamp() {
            return Err(stale());
        }
        match node.kind {
            NodeKind::Free => Err(HeapError::CorruptNode {
                index: h.index(),
                was: node.prior_kind,
            }),
            kind if !kind.is_live_kind() => Err(stale()),
            _ => Ok(h.id()),
        }
    }

    /// Accept nil or a live handle
    pub(crate) fn check_handle(&self, h: Handle) -> Result<()> {
        if h.is_nil() {
            return self.check_live();
        }
        self.resolve(h).map(|_| ())
    }

    pub(crate) fn resolve_kind(&self, h: Handle, expected: &'static str, ok: fn(NodeKind) -> bool) -> Result<NodeId> {
        let id = self.resolve(h)?;
        let kind = self.nodes[id].kind;
        if !ok(kind) {
            return Err(HeapError::wrong_kind(expected, kind));
        }
        Ok(id)
    }

    /// True if `h` is nil or names a live node
    pub fn is_valid(&self, h: Handle) -> bool {
        self.check_handle(h).is_ok()
    }

    pub fn kind(&self, h: Handle) -> Result<NodeKind> {
        if h.is_nil() {
            self.check_live()?;
            return Ok(NodeKind::Nil);
        }
        Ok(self.nodes[self.resolve(h)?].kind)
    }

    /// Header snapshot; nil reports as marked in the oldest generation
    pub fn node_info(&self, h: Handle) -> Result<NodeInfo> {
        if h.is_nil() {
            self.check_live()?;
            return Ok(NodeInfo {
                kind: NodeKind::Nil,
                class: 0,
                generation: (self.config.num_old_generations - 1) as u8,
                marked: true,
            });
        }
        let node = &self.nodes[self.resolve(h)?];
        Ok(NodeInfo {
            kind: node.kind,
            class: node.class,
            generation: node.gen,
            marked: node.marked,
        })
    }

    // ------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------

    /// Cell slot `i` (0..3) of a cell node; nil has nil slots
    pub fn cell_slot(&self, h: Handle, i: usize) -> Result<Handle> {
        if h.is_nil() {
            self.check_live()?;
            return Ok(Handle::NIL);
        }
        let id = self.resolve_kind(h, "cell", NodeKind::is_cell)?;
        match &self.nodes[id].body {
            Body::Cell(slots) => slots.get(i).copied().ok_or(HeapError::IndexOutOfBounds {
                index: i,
                length: 3,
            }),
            _ => Err(HeapError::wrong_kind("cell", self.nodes[id].kind)),
        }
    }

    /// Store into cell slot `i`, through the write barrier
    pub fn set_cell_slot(&mut self, h: Handle, i: usize, value: Handle) -> Result<()> {
        let id = self.resolve_kind(h, "cell", NodeKind::is_cell)?;
        self.check_handle(value)?;
        if i >= 3 {
            return Err(HeapError::IndexOutOfBounds { index: i, length: 3 });
        }
        self.check_old_to_new(id, value);
        match &mut self.nodes[id].body {
            Body::Cell(slots) => {
                slots[i] = value;
                Ok(())
            }
            _ => Err(HeapError::wrong_kind("cell", self.nodes[id].kind)),
        }
    }

    pub fn car(&self, h: Handle) -> Result<Handle> {
        self.cell_slot(h, CAR)
    }

    pub fn cdr(&self, h: Handle) -> Result<Handle> {
        self.cell_slot(h, CDR)
    }

    pub fn tag(&self, h: Handle) -> Result<Handle> {
        self.cell_slot(h, TAG)
    }

    pub fn set_car(&mut self, h: Handle, value: Handle) -> Result<()> {
        self.set_cell_slot(h, CAR, value)
    }

    pub fn set_cdr(&mut self, h: Handle, value: Handle) -> Result<()> {
        self.set_cell_slot(h, CDR, value)
    }

    pub fn set_tag(&mut self, h: Handle, value: Handle) -> Result<()> {
        self.set_cell_slot(h, TAG, value)
    }

    fn env_slot(&self, env: Handle, i: usize) -> Result<Handle> {
        self.resolve_kind(env, "environment", |k| k == NodeKind::Environment)?;
        self.cell_slot(env, i)
    }

    fn set_env_slot(&mut self, env: Handle, i: usize, value: Handle) -> Result<()> {
        self.resolve_kind(env, "environment", |k| k == NodeKind::Environment)?;
        self.set_cell_slot(env, i, value)
    }

    pub fn frame(&self, env: Handle) -> Result<Handle> {
        self.env_slot(env, 0)
    }

    pub fn enclos(&self, env: Handle) -> Result<Handle> {
        self.env_slot(env, 1)
    }

    pub fn hashtab(&self, env: Handle) -> Result<Handle> {
        self.env_slot(env, 2)
    }

    pub fn set_frame(&mut self, env: Handle, value: Handle) -> Result<()> {
        self.set_env_slot(env, 0, value)
    }

    pub fn set_enclos(&mut self, env: Handle, value: Handle) -> Result<()> {
        self.set_env_slot(env, 1, value)
    }

    pub fn set_hashtab(&mut self, env: Handle, value: Handle) -> Result<()> {
        self.set_env_slot(env, 2, value)
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn attrib(&self, h: Handle) -> Result<Handle> {
        if h.is_nil() {
            self.check_live()?;
            return Ok(Handle::NIL);
        }
        Ok(self.nodes[self.resolve(h)?].attrib)
    }

    pub fn set_attrib(&mut self, h: Handle, value: Handle) -> Result<()> {
        let id = self.resolve(h)?;
        self.check_handle(value)?;
        self.check_old_to_new(id, value);
        self.nodes[id].attrib = value;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vectors
    // ------------------------------------------------------------------

    /// Element count: vector length, pairlist length, 0 for nil, else 1
    pub fn length(&self, h: Handle) -> Result<usize> {
        if h.is_nil() {
            self.check_live()?;
            return Ok(0);
        }
        let id = self.resolve(h)?;
        let node = &self.nodes[id];
        if let Some(length) = node.body.vector_length() {
            return Ok(length);
        }
        match node.kind {
            NodeKind::Pair | NodeKind::Language | NodeKind::Dots => {
                let mut length = 0;
                let mut s = h;
                while !s.is_nil() && self.kind(s)?.is_cell() {
                    length += 1;
                    s = self.cdr(s)?;
                }
                Ok(length)
            }
            _ => Ok(1),
        }
    }

    /// Payload bytes of a vector node
    pub(crate) fn node_payload(&self, id: NodeId) -> &[u8] {
        let node = &self.nodes[id];
        match (&node.home, &node.body) {
            (_, Body::Vector { large: Some(block), .. }) => &block[..],
            (Home::Page { page, slot }, Body::Vector { .. }) => self.pages[*page]
                .as_ref()
                .map(|p| p.payload(*slot))
                .unwrap_or(&[]),
            _ => &[],
        }
    }

    pub(crate) fn node_payload_mut(&mut self, id: NodeId) -> &mut [u8] {
        let Heap { nodes, pages, .. } = self;
        let node = &mut nodes[id];
        match (&node.home, &mut node.body) {
            (_, Body::Vector { large: Some(block), .. }) => &mut block[..],
            (Home::Page { page, slot }, Body::Vector { .. }) => match pages[*page].as_mut() {
                Some(p) => p.payload_mut(*slot),
                None => &mut [],
            },
            _ => &mut [],
        }
    }

    /// Element `i` of a handle vector, without checks
    pub(crate) fn handle_elt(&self, id: NodeId, i: usize) -> Handle {
        let data = self.node_payload(id);
        let start = i * 8;
        match data.get(start..start + 8) {
            Some(bytes) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Handle::from_bits(u64::from_le_bytes(raw))
            }
            None => Handle::NIL,
        }
    }

    pub(crate) fn set_handle_elt(&mut self, id: NodeId, i: usize, value: Handle) {
        let start = i * 8;
        if let Some(bytes) = self.node_payload_mut(id).get_mut(start..start + 8) {
            bytes.copy_from_slice(&value.to_bits().to_le_bytes());
        }
    }

    fn checked_index(&self, id: NodeId, i: usize) -> Result<()> {
        let length = self.nodes[id].body.vector_length().unwrap_or(0);
        if i >= length {
            return Err(HeapError::IndexOutOfBounds { index: i, length });
        }
        Ok(())
    }

    fn handle_vector(&self, h: Handle, expected: &'static str, ok: fn(NodeKind) -> bool) -> Result<NodeId> {
        self.resolve_kind(h, expected, ok)
    }

    /// Element `i` of a list or expression vector
    pub fn vector_elt(&self, h: Handle, i: usize) -> Result<Handle> {
        let id = self.handle_vector(h, "list", |k| {
            matches!(k, NodeKind::List | NodeKind::Expression)
        })?;
        self.checked_index(id, i)?;
        Ok(self.handle_elt(id, i))
    }

    pub fn set_vector_elt(&mut self, h: Handle, i: usize, value: Handle) -> Result<()> {
        let id = self.handle_vector(h, "list", |k| {
            matches!(k, NodeKind::List | NodeKind::Expression)
        })?;
        self.checked_index(id, i)?;
        self.check_handle(value)?;
        self.check_old_to_new(id, value);
        self.set_handle_elt(id, i, value);
        Ok(())
    }

    /// Element `i` of a character vector
    pub fn string_elt(&self, h: Handle, i: usize) -> Result<Handle> {
        let id = self.handle_vector(h, "character", |k| k == NodeKind::Str)?;
        self.checked_index(id, i)?;
        Ok(self.handle_elt(id, i))
    }

    /// Store a `Char` node into a character vector
    pub fn set_string_elt(&mut self, h: Handle, i: usize, value: Handle) -> Result<()> {
        let id = self.handle_vector(h, "character", |k| k == NodeKind::Str)?;
        self.checked_index(id, i)?;
        let kind = self.kind(value)?;
        if kind != NodeKind::Char {
            return Err(HeapError::wrong_kind("char", kind));
        }
        self.check_old_to_new(id, value);
        self.set_handle_elt(id, i, value);
        Ok(())
    }

    fn data_vector(&self, h: Handle) -> Result<NodeId> {
        self.resolve_kind(h, "data vector", |k| {
            k.element_bytes().is_some() && !k.holds_handles()
        })
    }

    fn data_len(&self, id: NodeId) -> usize {
        let node = &self.nodes[id];
        let length = node.body.vector_length().unwrap_or(0);
        length * node.kind.element_bytes().unwrap_or(0)
    }

    /// Raw bytes of a data vector
    pub fn vector_bytes(&self, h: Handle) -> Result<&[u8]> {
        let id = self.data_vector(h)?;
        let len = self.data_len(id);
        Ok(&self.node_payload(id)[..len])
    }

    pub fn vector_bytes_mut(&mut self, h: Handle) -> Result<&mut [u8]> {
        let id = self.data_vector(h)?;
        let len = self.data_len(id);
        Ok(&mut self.node_payload_mut(id)[..len])
    }

    /// Bytes of a `Char` node, without the trailing NUL
    pub fn char_bytes(&self, h: Handle) -> Result<&[u8]> {
        let id = self.resolve_kind(h, "char", |k| k == NodeKind::Char)?;
        let len = self.data_len(id);
        Ok(&self.node_payload(id)[..len])
    }

    fn elt_bytes<const N: usize>(&self, h: Handle, kind: NodeKind, i: usize) -> Result<[u8; N]> {
        let id = self.resolve(h)?;
        let found = self.nodes[id].kind;
        if found != kind {
            return Err(HeapError::wrong_kind(kind.name(), found));
        }
        self.checked_index(id, i)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.node_payload(id)[i * N..(i + 1) * N]);
        Ok(out)
    }

    fn set_elt_bytes<const N: usize>(
        &mut self,
        h: Handle,
        kind: NodeKind,
        i: usize,
        bytes: [u8; N],
    ) -> Result<()> {
        let id = self.resolve(h)?;
        let found = self.nodes[id].kind;
        if found != kind {
            return Err(HeapError::wrong_kind(kind.name(), found));
        }
        self.checked_index(id, i)?;
        self.node_payload_mut(id)[i * N..(i + 1) * N].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn integer_elt(&self, h: Handle, i: usize) -> Result<i32> {
        self.elt_bytes(h, NodeKind::Integer, i).map(i32::from_le_bytes)
    }

    pub fn set_integer_elt(&mut self, h: Handle, i: usize, value: i32) -> Result<()> {
        self.set_elt_bytes(h, NodeKind::Integer, i, value.to_le_bytes())
    }

    pub fn logical_elt(&self, h: Handle, i: usize) -> Result<i32> {
        self.elt_bytes(h, NodeKind::Logical, i).map(i32::from_le_bytes)
    }

    pub fn set_logical_elt(&mut self, h: Handle, i: usize, value: i32) -> Result<()> {
        self.set_elt_bytes(h, NodeKind::Logical, i, value.to_le_bytes())
    }

    pub fn real_elt(&self, h: Handle, i: usize) -> Result<f64> {
        self.elt_bytes(h, NodeKind::Real, i).map(f64::from_le_bytes)
    }

    pub fn set_real_elt(&mut self, h: Handle, i: usize, value: f64) -> Result<()> {
        self.set_elt_bytes(h, NodeKind::Real, i, value.to_le_bytes())
    }

    /// Real and imaginary parts of element `i`
    pub fn complex_elt(&self, h: Handle, i: usize) -> Result<(f64, f64)> {
        let bytes: [u8; 16] = self.elt_bytes(h, NodeKind::Complex, i)?;
        let (re, im) = bytes.split_at(8);
        let part = |b: &[u8]| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            f64::from_le_bytes(raw)
        };
        Ok((part(re), part(im)))
    }

    pub fn set_complex_elt(&mut self, h: Handle, i: usize, value: (f64, f64)) -> Result<()> {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&value.0.to_le_bytes());
        bytes[8..].copy_from_slice(&value.1.to_le_bytes());
        self.set_elt_bytes(h, NodeKind::Complex, i, bytes)
    }

    // ------------------------------------------------------------------
    // External pointers and primitives
    // ------------------------------------------------------------------

    fn external(&self, h: Handle) -> Result<NodeId> {
        self.resolve_kind(h, "externalptr", |k| k == NodeKind::ExternalPtr)
    }

    pub fn external_addr(&self, h: Handle) -> Result<usize> {
        match &self.nodes[self.external(h)?].body {
            Body::External { addr, .. } => Ok(*addr),
            _ => Ok(0),
        }
    }

    pub fn set_external_addr(&mut self, h: Handle, value: usize) -> Result<()> {
        let id = self.external(h)?;
        if let Body::External { addr, .. } = &mut self.nodes[id].body {
            *addr = value;
        }
        Ok(())
    }

    pub fn external_tag(&self, h: Handle) -> Result<Handle> {
        match &self.nodes[self.external(h)?].body {
            Body::External { tag, .. } => Ok(*tag),
            _ => Ok(Handle::NIL),
        }
    }

    pub fn external_prot(&self, h: Handle) -> Result<Handle> {
        match &self.nodes[self.external(h)?].body {
            Body::External { prot, .. } => Ok(*prot),
            _ => Ok(Handle::NIL),
        }
    }

    pub fn set_external_tag(&mut self, h: Handle, value: Handle) -> Result<()> {
        let id = self.external(h)?;
        self.check_handle(value)?;
        self.check_old_to_new(id, value);
        if let Body::External { tag, .. } = &mut self.nodes[id].body {
            *tag = value;
        }
        Ok(())
    }

    pub fn set_external_prot(&mut self, h: Handle, value: Handle) -> Result<()> {
        let id = self.external(h)?;
        self.check_handle(value)?;
        self.check_old_to_new(id, value);
        if let Body::External { prot, .. } = &mut self.nodes[id].body {
            *prot = value;
        }
        Ok(())
    }

    /// Dispatch code of a builtin or special
    pub fn primitive_code(&self, h: Handle) -> Result<u32> {
        let id = self.resolve_kind(h, "primitive", |k| {
            matches!(k, NodeKind::Builtin | NodeKind::Special)
        })?;
        match self.nodes[id].body {
            Body::Primitive(code) => Ok(code),
            _ => Err(HeapError::wrong_kind("primitive", self.nodes[id].kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GcConfig;
    use crate::error::HeapError;
    use crate::heap::Heap;
    use crate::object::{Handle, NodeKind};

    fn heap() -> Heap {
        Heap::new(GcConfig::default()).unwrap()
    }

    #[test]
    fn test_nil_reads() {
        let heap = heap();
        assert_eq!(heap.kind(Handle::NIL).unwrap(), NodeKind::Nil);
        assert_eq!(heap.length(Handle::NIL).unwrap(), 0);
        assert!(heap.car(Handle::NIL).unwrap().is_nil());
        assert!(heap.node_info(Handle::NIL).unwrap().marked);
    }

    #[test]
    fn test_pairlist_length() {
        let mut heap = heap();
        let mut list = Handle::NIL;
        for _ in 0..4 {
            list = heap.cons(Handle::NIL, list).unwrap();
        }
        assert_eq!(heap.length(list).unwrap(), 4);
    }

    #[test]
    fn test_typed_elements() {
        let mut heap = heap();
        let ints = heap.alloc_vector(NodeKind::Integer, 3).unwrap();
        heap.set_integer_elt(ints, 2, -7).unwrap();
        assert_eq!(heap.integer_elt(ints, 2).unwrap(), -7);
        assert_eq!(heap.integer_elt(ints, 0).unwrap(), 0);

        let cplx = heap.alloc_vector(NodeKind::Complex, 1).unwrap();
        heap.set_complex_elt(cplx, 0, (1.5, -2.0)).unwrap();
        assert_eq!(heap.complex_elt(cplx, 0).unwrap(), (1.5, -2.0));

        assert!(matches!(
            heap.real_elt(ints, 0),
            Err(HeapError::WrongKind { .. })
        ));
        assert!(matches!(
            heap.integer_elt(ints, 3),
            Err(HeapError::IndexOutOfBounds { index: 3, length: 3 })
        ));
    }

    #[test]
    fn test_env_slots_need_environment() {
        let mut heap = heap();
        let pair = heap.cons(Handle::NIL, Handle::NIL).unwrap();
        assert!(matches!(
            heap.frame(pair),
            Err(HeapError::WrongKind { .. })
        ));
        let env = heap
            .new_environment(Handle::NIL, Handle::NIL, Handle::NIL)
            .unwrap();
        heap.set_enclos(env, pair).unwrap();
        assert_eq!(heap.enclos(env).unwrap(), pair);
    }

    #[test]
    fn test_string_elements_must_be_chars() {
        let mut heap = heap();
        let strs = heap.alloc_vector(NodeKind::Str, 2).unwrap();
        assert_eq!(heap.string_elt(strs, 1).unwrap(), heap.blank_string());
        let pair = heap.cons(Handle::NIL, Handle::NIL).unwrap();
        assert!(heap.set_string_elt(strs, 0, pair).is_err());
        let s = heap.mk_char(b"abc").unwrap();
        heap.set_string_elt(strs, 0, s).unwrap();
        assert_eq!(heap.char_bytes(heap.string_elt(strs, 0).unwrap()).unwrap(), b"abc");
    }

    #[test]
    fn test_stale_handle_detected() {
        let mut heap = heap();
        let pair = heap.cons(Handle::NIL, Handle::NIL).unwrap();
        heap.gc_full(0).unwrap();
        // The unrooted pair's slot is either released or reused
        let _ = heap.cons(Handle::NIL, Handle::NIL).unwrap();
        assert!(matches!(
            heap.car(pair),
            Err(HeapError::StaleHandle { .. })
        ));
        assert!(!heap.is_valid(pair));
    }
}
