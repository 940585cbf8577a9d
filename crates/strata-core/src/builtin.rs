//! Predefined primitive types.

use serde::Serialize;

use crate::handle::TypeHandle;
use crate::metrics::Metrics;

/// The predefined leaf types. Every composite bottoms out in one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Builtin {
    Byte,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl Builtin {
    /// All predefined types, in handle order.
    pub const ALL: [Builtin; 11] = [
        Builtin::Byte,
        Builtin::I8,
        Builtin::I16,
        Builtin::I32,
        Builtin::I64,
        Builtin::U8,
        Builtin::U16,
        Builtin::U32,
        Builtin::U64,
        Builtin::F32,
        Builtin::F64,
    ];

    pub fn size(self) -> usize {
        match self {
            Builtin::Byte | Builtin::I8 | Builtin::U8 => 1,
            Builtin::I16 | Builtin::U16 => 2,
            Builtin::I32 | Builtin::U32 | Builtin::F32 => 4,
            Builtin::I64 | Builtin::U64 | Builtin::F64 => 8,
        }
    }

    /// Natural alignment; equals the size for every predefined type.
    pub fn alignment(self) -> usize {
        self.size()
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Byte => "byte",
            Builtin::I8 => "i8",
            Builtin::I16 => "i16",
            Builtin::I32 => "i32",
            Builtin::I64 => "i64",
            Builtin::U8 => "u8",
            Builtin::U16 => "u16",
            Builtin::U32 => "u32",
            Builtin::U64 => "u64",
            Builtin::F32 => "f32",
            Builtin::F64 => "f64",
        }
    }

    pub fn metrics(self) -> Metrics {
        Metrics::builtin(self.size(), self.alignment())
    }

    /// The fixed handle this type is published under.
    pub fn handle(self) -> TypeHandle {
        TypeHandle::from_raw(self as u32 + 1)
    }

    /// Inverse of [`Builtin::handle`].
    pub fn from_handle(handle: TypeHandle) -> Option<Builtin> {
        let raw = handle.raw();
        if raw == 0 {
            return None;
        }
        Builtin::ALL.get(raw as usize - 1).copied()
    }
}
