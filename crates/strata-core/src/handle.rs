//! The handle table: 32-bit ids mapping to shared type nodes.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::LayoutError;
use crate::node::TypeNode;

/// First id available to user-constructed types. Everything below is
/// reserved for predefined types and is never recycled.
pub const PREDEFINED_LAST: u32 = 16;

/// Opaque 32-bit datatype handle. `NULL` names no type; the low range holds
/// the predefined primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TypeHandle(u32);

impl TypeHandle {
    pub const NULL: TypeHandle = TypeHandle(0);
    pub const BYTE: TypeHandle = TypeHandle(1);
    pub const I8: TypeHandle = TypeHandle(2);
    pub const I16: TypeHandle = TypeHandle(3);
    pub const I32: TypeHandle = TypeHandle(4);
    pub const I64: TypeHandle = TypeHandle(5);
    pub const U8: TypeHandle = TypeHandle(6);
    pub const U16: TypeHandle = TypeHandle(7);
    pub const U32: TypeHandle = TypeHandle(8);
    pub const U64: TypeHandle = TypeHandle(9);
    pub const F32: TypeHandle = TypeHandle(10);
    pub const F64: TypeHandle = TypeHandle(11);

    pub const fn from_raw(raw: u32) -> TypeHandle {
        TypeHandle(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn is_predefined(self) -> bool {
        self.0 != 0 && self.0 < PREDEFINED_LAST
    }
}

struct Slots {
    entries: Vec<Option<Arc<TypeNode>>>,
    free: Vec<u32>,
}

/// Concurrent id → node table. Lookups share a read lock; publication and
/// free serialize on the write lock, which also provides the
/// publication-happens-before-visibility edge.
pub struct HandleTable {
    slots: RwLock<Slots>,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            slots: RwLock::new(Slots {
                entries: (0..PREDEFINED_LAST).map(|_| None).collect(),
                free: Vec::new(),
            }),
        }
    }

    /// Publish a predefined type at its fixed slot.
    pub fn publish_predefined(&self, handle: TypeHandle, node: Arc<TypeNode>) {
        debug_assert!(handle.is_predefined());
        let mut slots = self.slots.write().unwrap();
        let entry = &mut slots.entries[handle.raw() as usize];
        debug_assert!(entry.is_none());
        *entry = Some(node);
    }

    /// Publish a node, yielding a fresh user-range handle.
    pub fn publish(&self, node: Arc<TypeNode>) -> Result<TypeHandle, LayoutError> {
        let mut slots = self.slots.write().unwrap();
        match slots.free.pop() {
            Some(id) => {
                debug_assert!(slots.entries[id as usize].is_none());
                slots.entries[id as usize] = Some(node);
                Ok(TypeHandle(id))
            }
            None => {
                let id = slots.entries.len();
                if id > u32::MAX as usize {
                    return Err(LayoutError::TableFull);
                }
                slots.entries.push(Some(node));
                Ok(TypeHandle(id as u32))
            }
        }
    }

    pub fn lookup(&self, handle: TypeHandle) -> Result<Arc<TypeNode>, LayoutError> {
        let slots = self.slots.read().unwrap();
        slots
            .entries
            .get(handle.raw() as usize)
            .and_then(|e| e.as_ref())
            .cloned()
            .ok_or(LayoutError::InvalidHandle(handle.raw()))
    }

    /// Release the table's reference for a user handle. The node itself
    /// survives for as long as parents (or other dup handles) share it.
    pub fn free(&self, handle: TypeHandle) -> Result<(), LayoutError> {
        if handle.is_predefined() {
            return Err(LayoutError::FreePredefined(handle.raw()));
        }
        let mut slots = self.slots.write().unwrap();
        let entry = slots
            .entries
            .get_mut(handle.raw() as usize)
            .ok_or(LayoutError::InvalidHandle(handle.raw()))?;
        if entry.take().is_none() {
            return Err(LayoutError::InvalidHandle(handle.raw()));
        }
        slots.free.push(handle.raw());
        Ok(())
    }

    /// The node's live reference count (table entries plus parents),
    /// observed without creating a transient reference.
    pub fn refcount(&self, handle: TypeHandle) -> Result<usize, LayoutError> {
        let slots = self.slots.read().unwrap();
        slots
            .entries
            .get(handle.raw() as usize)
            .and_then(|e| e.as_ref())
            .map(Arc::strong_count)
            .ok_or(LayoutError::InvalidHandle(handle.raw()))
    }

    /// Number of live user-range entries.
    pub fn user_count(&self) -> usize {
        let slots = self.slots.read().unwrap();
        slots.entries[PREDEFINED_LAST as usize..]
            .iter()
            .filter(|e| e.is_some())
            .count()
    }

    /// Drop every entry, predefined included. Used at finalize.
    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap();
        slots.entries.clear();
        slots.free.clear();
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        HandleTable::new()
    }
}
