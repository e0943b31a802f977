//! Interned types and target data layout.
//!
//! Types are owned by the context's intern table: constructing two
//! structurally equal descriptors returns the same `Type` handle, so
//! identity comparison is type equality. The primitive types are interned
//! at table construction in a fixed order, which is what makes the `VOID`,
//! `I8`, ... constants below valid handles for every context.
//!
//! Struct layout (field offsets, size, alignment) is computed once at
//! construction from the layout rules of the architecture selected at that
//! point and never recomputed; callers are expected to select the target
//! before building composite types.

use crate::entity::PrimaryMap;
use crate::ir::entities::Type;
use rustc_hash::FxHashMap;

/// Pre-interned primitive handles. Indices match the construction order in
/// `TypeStore::new`.
pub const VOID: Type = Type::from_u32(0);
pub const I8: Type = Type::from_u32(1);
pub const I16: Type = Type::from_u32(2);
pub const I32: Type = Type::from_u32(3);
pub const I64: Type = Type::from_u32(4);
pub const U8: Type = Type::from_u32(5);
pub const U16: Type = Type::from_u32(6);
pub const U32: Type = Type::from_u32(7);
pub const U64: Type = Type::from_u32(8);
pub const F32: Type = Type::from_u32(9);
pub const F64: Type = Type::from_u32(10);

const NUM_PRIMITIVES: u32 = 11;

/// The structural descriptor behind a `Type` handle.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeData {
    /// No value.
    Void,
    /// Fixed-width integer.
    Int { bits: u8, signed: bool },
    /// IEEE-format floating point (the emission format is a backend
    /// concern; width is all that matters here).
    Float { bits: u8 },
    /// Pointer to `pointee`.
    Ptr { pointee: Type },
    /// Fixed-length array.
    Array { elem: Type, len: u32 },
    /// Ordered fields with byte offsets computed at construction.
    Struct {
        fields: Vec<Type>,
        offsets: Vec<u32>,
        size: u32,
        align: u32,
    },
    /// Function signature.
    Func {
        ret: Type,
        params: Vec<Type>,
        variadic: bool,
    },
}

/// The intern table. Owned by the `Context`; modules only hold handles.
pub struct TypeStore {
    data: PrimaryMap<Type, TypeData>,
    interned: FxHashMap<TypeData, Type>,
}

impl TypeStore {
    /// Create a store with the primitives pre-interned in canonical order.
    pub fn new() -> Self {
        let mut store = Self {
            data: PrimaryMap::new(),
            interned: FxHashMap::default(),
        };
        store.intern(TypeData::Void);
        for &(bits, signed) in &[
            (8u8, true),
            (16, true),
            (32, true),
            (64, true),
            (8, false),
            (16, false),
            (32, false),
            (64, false),
        ] {
            store.intern(TypeData::Int { bits, signed });
        }
        store.intern(TypeData::Float { bits: 32 });
        store.intern(TypeData::Float { bits: 64 });
        debug_assert_eq!(store.data.len() as u32, NUM_PRIMITIVES);
        store
    }

    /// Intern a descriptor, returning the canonical handle.
    pub fn intern(&mut self, data: TypeData) -> Type {
        if let Some(&ty) = self.interned.get(&data) {
            return ty;
        }
        let ty = self.data.push(data.clone());
        self.interned.insert(data, ty);
        ty
    }

    /// Get the descriptor behind a handle.
    pub fn data(&self, ty: Type) -> &TypeData {
        &self.data[ty]
    }

    /// Construct (or find) a pointer type.
    pub fn make_ptr(&mut self, pointee: Type) -> Type {
        self.intern(TypeData::Ptr { pointee })
    }

    /// Construct (or find) an array type.
    pub fn make_array(&mut self, elem: Type, len: u32) -> Type {
        self.intern(TypeData::Array { elem, len })
    }

    /// Construct (or find) a struct type, computing its layout with the
    /// given pointer width.
    pub fn make_struct(&mut self, fields: &[Type], pointer_bytes: u32) -> Type {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u32;
        let mut align = 1u32;
        for &field in fields {
            let fa = self.align_of(field, pointer_bytes);
            let fs = self.size_of(field, pointer_bytes);
            offset = round_up(offset, fa);
            offsets.push(offset);
            offset += fs;
            align = align.max(fa);
        }
        let size = round_up(offset, align);
        self.intern(TypeData::Struct {
            fields: fields.to_vec(),
            offsets,
            size,
            align,
        })
    }

    /// Construct (or find) a function type.
    pub fn make_func(&mut self, ret: Type, params: &[Type], variadic: bool) -> Type {
        self.intern(TypeData::Func {
            ret,
            params: params.to_vec(),
            variadic,
        })
    }

    /// Size of a value of this type in bytes.
    pub fn size_of(&self, ty: Type, pointer_bytes: u32) -> u32 {
        match self.data(ty) {
            TypeData::Void => 0,
            TypeData::Int { bits, .. } | TypeData::Float { bits } => u32::from(*bits) / 8,
            TypeData::Ptr { .. } | TypeData::Func { .. } => pointer_bytes,
            TypeData::Array { elem, len } => self.size_of(*elem, pointer_bytes) * len,
            TypeData::Struct { size, .. } => *size,
        }
    }

    /// Natural alignment of this type in bytes.
    pub fn align_of(&self, ty: Type, pointer_bytes: u32) -> u32 {
        match self.data(ty) {
            TypeData::Void => 1,
            TypeData::Int { bits, .. } | TypeData::Float { bits } => u32::from(*bits) / 8,
            TypeData::Ptr { .. } | TypeData::Func { .. } => pointer_bytes,
            TypeData::Array { elem, .. } => self.align_of(*elem, pointer_bytes),
            TypeData::Struct { align, .. } => *align,
        }
    }

    /// Whether `ty` is an integer type.
    pub fn is_int(&self, ty: Type) -> bool {
        matches!(self.data(ty), TypeData::Int { .. })
    }

    /// Whether `ty` is a floating point type.
    pub fn is_float(&self, ty: Type) -> bool {
        matches!(self.data(ty), TypeData::Float { .. })
    }

    /// Whether `ty` is a pointer type.
    pub fn is_ptr(&self, ty: Type) -> bool {
        matches!(self.data(ty), TypeData::Ptr { .. })
    }

    /// Whether `ty` is void.
    pub fn is_void(&self, ty: Type) -> bool {
        matches!(self.data(ty), TypeData::Void)
    }

    /// Integer width in bits, if `ty` is an integer.
    pub fn int_bits(&self, ty: Type) -> Option<u8> {
        match self.data(ty) {
            TypeData::Int { bits, .. } => Some(*bits),
            _ => None,
        }
    }

    /// Whether `ty` is a signed integer.
    pub fn is_signed(&self, ty: Type) -> bool {
        matches!(self.data(ty), TypeData::Int { signed: true, .. })
    }

    /// Float width in bits, if `ty` is floating point.
    pub fn float_bits(&self, ty: Type) -> Option<u8> {
        match self.data(ty) {
            TypeData::Float { bits } => Some(*bits),
            _ => None,
        }
    }

    /// The pointee of a pointer type.
    pub fn pointee(&self, ty: Type) -> Option<Type> {
        match self.data(ty) {
            TypeData::Ptr { pointee } => Some(*pointee),
            _ => None,
        }
    }

    /// Element type and length of an array type.
    pub fn array_info(&self, ty: Type) -> Option<(Type, u32)> {
        match self.data(ty) {
            TypeData::Array { elem, len } => Some((*elem, *len)),
            _ => None,
        }
    }

    /// Fields and offsets of a struct type.
    pub fn struct_info(&self, ty: Type) -> Option<(&[Type], &[u32])> {
        match self.data(ty) {
            TypeData::Struct {
                fields, offsets, ..
            } => Some((fields, offsets)),
            _ => None,
        }
    }

    /// Return type, parameters, and variadic flag of a function type.
    pub fn func_info(&self, ty: Type) -> Option<(Type, &[Type], bool)> {
        match self.data(ty) {
            TypeData::Func {
                ret,
                params,
                variadic,
            } => Some((*ret, params, *variadic)),
            _ => None,
        }
    }

    /// Write a human-readable rendering of `ty` for logs and the printer.
    pub fn display(&self, ty: Type) -> String {
        match self.data(ty) {
            TypeData::Void => "void".to_string(),
            TypeData::Int { bits, signed: true } => format!("i{bits}"),
            TypeData::Int {
                bits,
                signed: false,
            } => format!("u{bits}"),
            TypeData::Float { bits } => format!("f{bits}"),
            TypeData::Ptr { pointee } => format!("{}*", self.display(*pointee)),
            TypeData::Array { elem, len } => format!("[{} x {}]", len, self.display(*elem)),
            TypeData::Struct { fields, .. } => {
                let inner: Vec<String> = fields.iter().map(|&f| self.display(f)).collect();
                format!("{{{}}}", inner.join(", "))
            }
            TypeData::Func {
                ret,
                params,
                variadic,
            } => {
                let mut inner: Vec<String> = params.iter().map(|&p| self.display(p)).collect();
                if *variadic {
                    inner.push("...".to_string());
                }
                format!("{}({})", self.display(*ret), inner.join(", "))
            }
        }
    }
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn round_up(n: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two() || align == 1 || align == 0);
    if align <= 1 {
        return n;
    }
    (n + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_canonical() {
        let mut store = TypeStore::new();
        assert_eq!(
            store.intern(TypeData::Int {
                bits: 32,
                signed: true
            }),
            I32
        );
        assert_eq!(store.intern(TypeData::Float { bits: 64 }), F64);
        assert_eq!(store.intern(TypeData::Void), VOID);
    }

    #[test]
    fn identity_equals_structural_equality() {
        let mut store = TypeStore::new();
        let p1 = store.make_ptr(I32);
        let p2 = store.make_ptr(I32);
        assert_eq!(p1, p2);
        let a1 = store.make_array(I8, 16);
        let a2 = store.make_array(I8, 16);
        assert_eq!(a1, a2);
        assert_ne!(p1, a1);
        let f1 = store.make_func(I32, &[I32, I64], false);
        let f2 = store.make_func(I32, &[I32, I64], false);
        assert_eq!(f1, f2);
        let f3 = store.make_func(I32, &[I32, I64], true);
        assert_ne!(f1, f3);
    }

    #[test]
    fn struct_layout() {
        let mut store = TypeStore::new();
        let s = store.make_struct(&[I8, I32, I16], 8);
        let (fields, offsets) = store.struct_info(s).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(offsets, &[0, 4, 8]);
        assert_eq!(store.size_of(s, 8), 12);
        assert_eq!(store.align_of(s, 8), 4);
    }

    #[test]
    fn pointer_size_follows_target() {
        let mut store = TypeStore::new();
        let p = store.make_ptr(F64);
        assert_eq!(store.size_of(p, 4), 4);
        assert_eq!(store.size_of(p, 8), 8);
    }
}
