//! Type conversion from the GPU dialect to runtime-callable types.

use crate::ir::{MemRefType, Type};

/// Maps input types to the types the lowered program uses.
///
/// | input              | lowered                                        |
/// |--------------------|------------------------------------------------|
/// | `!gpu.async.token` | `i8*`                                          |
/// | `index`            | `iN`, N = index bit width                      |
/// | `memref<..xT>`     | `{T*, T*, iN, [r x iN], [r x iN]}`             |
/// | `memref<*xT>`      | `{iN, i8*}`                                    |
/// | `!async.value<T>`  | `!async.value<convert(T)>`                     |
///
/// A rank-0 buffer has no size or stride arrays and lowers to
/// `{T*, T*, iN}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeConverter {
    index_bits: u32,
}

impl TypeConverter {
    pub fn new(index_bits: u32) -> Self {
        Self { index_bits }
    }

    pub fn index_bits(&self) -> u32 {
        self.index_bits
    }

    pub fn index_type(&self) -> Type {
        Type::Int(self.index_bits)
    }

    /// Largest value a signed index constant can hold.
    pub fn max_index(&self) -> u64 {
        (1u64 << (self.index_bits - 1)) - 1
    }

    /// Bytes one lowered value of `ty` occupies in a buffer.
    pub fn store_size(&self, ty: &Type) -> u64 {
        match ty {
            Type::Int(w) | Type::Float(w) => u64::from(w.div_ceil(8)),
            Type::Index | Type::Ptr(_) => u64::from(self.index_bits / 8),
            _ => 1,
        }
    }

    pub fn convert(&self, ty: &Type) -> Type {
        match ty {
            Type::Token => Type::i8_ptr(),
            Type::Index => self.index_type(),
            Type::MemRef(m) => self.descriptor_type(m),
            Type::UnrankedMemRef(_) => Type::Struct(vec![self.index_type(), Type::i8_ptr()]),
            Type::AsyncValue(inner) => Type::AsyncValue(Box::new(self.convert(inner))),
            Type::Ptr(inner) => Type::ptr(self.convert(inner)),
            Type::Array(n, inner) => Type::Array(*n, Box::new(self.convert(inner))),
            Type::Struct(fields) => Type::Struct(fields.iter().map(|t| self.convert(t)).collect()),
            Type::AsyncToken | Type::Int(_) | Type::Float(_) | Type::Void => ty.clone(),
        }
    }

    /// Lowered element type of a buffer.
    pub fn convert_element(&self, m: &MemRefType) -> Type {
        self.convert(&m.elem)
    }

    /// `T*` for the buffer's element type.
    pub fn element_ptr_type(&self, m: &MemRefType) -> Type {
        Type::ptr(self.convert_element(m))
    }

    pub fn descriptor_type(&self, m: &MemRefType) -> Type {
        let ptr = self.element_ptr_type(m);
        let mut fields = vec![ptr.clone(), ptr, self.index_type()];
        if m.rank() > 0 {
            let array = Type::Array(m.rank() as u64, Box::new(self.index_type()));
            fields.push(array.clone());
            fields.push(array);
        }
        Type::Struct(fields)
    }

    /// A type is legal once nothing in it needs converting. `async` types
    /// stay, as long as what they carry is legal.
    pub fn is_legal(&self, ty: &Type) -> bool {
        match ty {
            Type::AsyncToken => true,
            Type::AsyncValue(inner) => self.is_legal(inner),
            other => other.is_runtime_compatible(),
        }
    }
}
