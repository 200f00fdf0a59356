//! Types shared by the GPU dialect input and the lowered runtime-call output.
//!
//! The input side speaks in buffers (`memref`), indices and async tokens.
//! The output side only knows integers, floats, pointers and aggregates:
//! the subset a plain C-callable runtime can be called with.

use std::fmt;

// ─── Buffer types ─────────────────────────────────────────────────

/// One buffer dimension, stride or offset: known at compile time or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(u64),
    Dynamic,
}

impl Dim {
    pub fn as_static(self) -> Option<u64> {
        match self {
            Dim::Static(n) => Some(n),
            Dim::Dynamic => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(n) => write!(f, "{}", n),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

/// Index-to-offset mapping of a ranked buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Natural row-major strides, zero offset.
    Identity,
    /// Explicit strides and offset.
    Strided { strides: Vec<Dim>, offset: Dim },
}

/// A ranked buffer type: `memref<4x?xf32>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemRefType {
    pub shape: Vec<Dim>,
    pub elem: Box<Type>,
    pub layout: Layout,
}

impl MemRefType {
    pub fn new(shape: Vec<Dim>, elem: Type) -> Self {
        Self {
            shape,
            elem: Box::new(elem),
            layout: Layout::Identity,
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn has_static_shape(&self) -> bool {
        self.shape.iter().all(|d| matches!(d, Dim::Static(_)))
    }

    /// Total element count when every dimension is static and the product
    /// fits in a `u64`.
    pub fn num_elements(&self) -> Option<u64> {
        self.shape
            .iter()
            .try_fold(1u64, |acc, d| acc.checked_mul(d.as_static()?))
    }

    /// Row-major strides implied by the shape. A stride becomes dynamic as
    /// soon as any dimension to its right is dynamic, or once the running
    /// product overflows.
    pub fn canonical_strides(&self) -> Vec<Dim> {
        let mut strides = vec![Dim::Static(1); self.rank()];
        let mut running = Some(1u64);
        for i in (0..self.rank()).rev() {
            strides[i] = running.map_or(Dim::Dynamic, Dim::Static);
            running = match (running, self.shape[i]) {
                (Some(r), Dim::Static(n)) => r.checked_mul(n),
                _ => None,
            };
        }
        strides
    }

    /// True when the layout equals the natural row-major layout. An explicit
    /// strided layout only counts if every stride and the offset are static
    /// and match the canonical ones.
    pub fn has_identity_layout(&self) -> bool {
        match &self.layout {
            Layout::Identity => true,
            Layout::Strided { strides, offset } => {
                let canonical = self.canonical_strides();
                *offset == Dim::Static(0)
                    && strides.len() == canonical.len()
                    && strides
                        .iter()
                        .zip(&canonical)
                        .all(|(s, c)| matches!(s, Dim::Static(_)) && s == c)
            }
        }
    }
}

impl fmt::Display for MemRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memref<")?;
        for d in &self.shape {
            write!(f, "{}x", d)?;
        }
        write!(f, "{}", self.elem)?;
        if let Layout::Strided { strides, offset } = &self.layout {
            let strides: Vec<String> = strides.iter().map(|s| s.to_string()).collect();
            write!(f, ", strided<[{}], offset: {}>", strides.join(", "), offset)?;
        }
        write!(f, ">")
    }
}

// ─── Types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    // ── Input side ──
    Index,
    /// `!gpu.async.token`: pending device work.
    Token,
    /// `!async.token`: completion of an `async.execute` region.
    AsyncToken,
    /// `!async.value<T>`: a value yielded by an `async.execute` region.
    AsyncValue(Box<Type>),
    MemRef(MemRefType),
    /// `memref<*xT>`: rank only known at runtime.
    UnrankedMemRef(Box<Type>),

    // ── Shared ──
    Int(u32),
    Float(u32),

    // ── Output side ──
    Void,
    Ptr(Box<Type>),
    Array(u64, Box<Type>),
    Struct(Vec<Type>),
}

impl Type {
    pub fn ptr(pointee: Type) -> Type {
        Type::Ptr(Box::new(pointee))
    }

    /// `i8*`, the opaque handle and type-erased pointer type.
    pub fn i8_ptr() -> Type {
        Type::ptr(Type::Int(8))
    }

    /// `i8**`, the type of the kernel parameter array.
    pub fn i8_ptr_ptr() -> Type {
        Type::ptr(Type::i8_ptr())
    }

    pub fn is_token(&self) -> bool {
        matches!(self, Type::Token)
    }

    /// Bit width of an integer or float scalar.
    pub fn scalar_width(&self) -> Option<u32> {
        match self {
            Type::Int(w) | Type::Float(w) => Some(*w),
            _ => None,
        }
    }

    /// Whether a plain C-callable runtime can consume values of this type.
    pub fn is_runtime_compatible(&self) -> bool {
        match self {
            Type::Int(_) | Type::Float(_) | Type::Void => true,
            Type::Ptr(inner) | Type::Array(_, inner) => inner.is_runtime_compatible(),
            Type::Struct(fields) => fields.iter().all(Type::is_runtime_compatible),
            _ => false,
        }
    }

    /// Pointee of a pointer type.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Index => write!(f, "index"),
            Type::Token => write!(f, "!gpu.async.token"),
            Type::AsyncToken => write!(f, "!async.token"),
            Type::AsyncValue(inner) => write!(f, "!async.value<{}>", inner),
            Type::MemRef(m) => write!(f, "{}", m),
            Type::UnrankedMemRef(elem) => write!(f, "memref<*x{}>", elem),
            Type::Int(w) => write!(f, "i{}", w),
            Type::Float(w) => write!(f, "f{}", w),
            Type::Void => write!(f, "!llvm.void"),
            Type::Ptr(inner) => write!(f, "!llvm.ptr<{}>", inner),
            Type::Array(n, inner) => write!(f, "!llvm.array<{} x {}>", n, inner),
            Type::Struct(fields) => {
                let fields: Vec<String> = fields.iter().map(|t| t.to_string()).collect();
                write!(f, "!llvm.struct<({})>", fields.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_buf(shape: Vec<Dim>) -> MemRefType {
        MemRefType::new(shape, Type::Float(32))
    }

    #[test]
    fn test_canonical_strides_static() {
        let m = f32_buf(vec![Dim::Static(2), Dim::Static(3), Dim::Static(4)]);
        assert_eq!(
            m.canonical_strides(),
            vec![Dim::Static(12), Dim::Static(4), Dim::Static(1)]
        );
        assert_eq!(m.num_elements(), Some(24));
    }

    #[test]
    fn test_canonical_strides_dynamic_inner() {
        let m = f32_buf(vec![Dim::Static(2), Dim::Dynamic, Dim::Static(4)]);
        assert_eq!(
            m.canonical_strides(),
            vec![Dim::Dynamic, Dim::Static(4), Dim::Static(1)]
        );
        assert_eq!(m.num_elements(), None);
    }

    #[test]
    fn test_huge_shape_does_not_overflow() {
        let n = 1u64 << 40;
        let m = f32_buf(vec![Dim::Static(n), Dim::Static(n), Dim::Static(n)]);
        assert_eq!(m.num_elements(), None);
        assert_eq!(
            m.canonical_strides(),
            vec![Dim::Dynamic, Dim::Static(n), Dim::Static(1)]
        );
    }

    #[test]
    fn test_rank_zero_has_one_element() {
        let m = f32_buf(vec![]);
        assert_eq!(m.num_elements(), Some(1));
        assert!(m.canonical_strides().is_empty());
    }

    #[test]
    fn test_strided_layout_matching_canonical_is_identity() {
        let m = f32_buf(vec![Dim::Static(4), Dim::Static(4)]).with_layout(Layout::Strided {
            strides: vec![Dim::Static(4), Dim::Static(1)],
            offset: Dim::Static(0),
        });
        assert!(m.has_identity_layout());
    }

    #[test]
    fn test_transposed_layout_is_not_identity() {
        let m = f32_buf(vec![Dim::Static(4), Dim::Static(4)]).with_layout(Layout::Strided {
            strides: vec![Dim::Static(1), Dim::Static(4)],
            offset: Dim::Static(0),
        });
        assert!(!m.has_identity_layout());
    }

    #[test]
    fn test_dynamic_offset_is_not_identity() {
        let m = f32_buf(vec![Dim::Static(8)]).with_layout(Layout::Strided {
            strides: vec![Dim::Static(1)],
            offset: Dim::Dynamic,
        });
        assert!(!m.has_identity_layout());
    }

    #[test]
    fn test_display() {
        let m = f32_buf(vec![Dim::Static(4), Dim::Dynamic]);
        assert_eq!(Type::MemRef(m).to_string(), "memref<4x?xf32>");
        assert_eq!(
            Type::UnrankedMemRef(Box::new(Type::Int(32))).to_string(),
            "memref<*xi32>"
        );
        assert_eq!(Type::i8_ptr_ptr().to_string(), "!llvm.ptr<!llvm.ptr<i8>>");
        assert_eq!(
            Type::Struct(vec![Type::Int(64), Type::i8_ptr()]).to_string(),
            "!llvm.struct<(i64, !llvm.ptr<i8>)>"
        );
    }

    #[test]
    fn test_runtime_compatibility() {
        assert!(Type::i8_ptr().is_runtime_compatible());
        assert!(Type::Array(2, Box::new(Type::Int(64))).is_runtime_compatible());
        assert!(!Type::Index.is_runtime_compatible());
        assert!(!Type::Token.is_runtime_compatible());
        assert!(!Type::Struct(vec![Type::Index]).is_runtime_compatible());
    }
}
