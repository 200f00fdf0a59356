//! Building and reading lowered buffer descriptors.
//!
//! Ranked layout: `[0]` allocated pointer, `[1]` aligned pointer, `[2]`
//! offset, `[3, i]` size of dimension `i`, `[4, i]` stride of dimension
//! `i`. Unranked layout: `[0]` rank, `[1]` pointer to a ranked descriptor.

use crate::ir::{MemRefType, ValueId};

use super::rewriter::Rewriter;

const ALLOCATED_PTR: u32 = 0;
const ALIGNED_PTR: u32 = 1;
const OFFSET: u32 = 2;
const SIZES: u32 = 3;
const STRIDES: u32 = 4;

/// A lowered ranked buffer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRefDescriptor {
    value: ValueId,
}

impl MemRefDescriptor {
    pub fn new(value: ValueId) -> Self {
        Self { value }
    }

    pub fn value(self) -> ValueId {
        self.value
    }

    /// Assemble a descriptor from its parts. `sizes` and `strides` must
    /// have one entry per dimension of `ty`.
    pub fn build(
        rw: &mut Rewriter<'_>,
        ty: &MemRefType,
        allocated: ValueId,
        aligned: ValueId,
        offset: ValueId,
        sizes: &[ValueId],
        strides: &[ValueId],
    ) -> Self {
        debug_assert_eq!(sizes.len(), ty.rank());
        debug_assert_eq!(strides.len(), ty.rank());
        let desc_ty = rw.converter().descriptor_type(ty);
        let mut desc = rw.undef(desc_ty);
        desc = rw.insert_value(desc, allocated, &[ALLOCATED_PTR]);
        desc = rw.insert_value(desc, aligned, &[ALIGNED_PTR]);
        desc = rw.insert_value(desc, offset, &[OFFSET]);
        for (i, &size) in sizes.iter().enumerate() {
            desc = rw.insert_value(desc, size, &[SIZES, i as u32]);
        }
        for (i, &stride) in strides.iter().enumerate() {
            desc = rw.insert_value(desc, stride, &[STRIDES, i as u32]);
        }
        Self::new(desc)
    }

    pub fn allocated_ptr(self, rw: &mut Rewriter<'_>) -> ValueId {
        rw.extract_value(self.value, &[ALLOCATED_PTR])
    }

    pub fn aligned_ptr(self, rw: &mut Rewriter<'_>) -> ValueId {
        rw.extract_value(self.value, &[ALIGNED_PTR])
    }

    pub fn offset(self, rw: &mut Rewriter<'_>) -> ValueId {
        rw.extract_value(self.value, &[OFFSET])
    }

    pub fn size(self, rw: &mut Rewriter<'_>, dim: usize) -> ValueId {
        rw.extract_value(self.value, &[SIZES, dim as u32])
    }

    pub fn stride(self, rw: &mut Rewriter<'_>, dim: usize) -> ValueId {
        rw.extract_value(self.value, &[STRIDES, dim as u32])
    }

    /// Every field as a flat list: allocated, aligned, offset, sizes,
    /// strides.
    pub fn unpack(self, rw: &mut Rewriter<'_>, rank: usize) -> Vec<ValueId> {
        let mut fields = vec![
            self.allocated_ptr(rw),
            self.aligned_ptr(rw),
            self.offset(rw),
        ];
        for i in 0..rank {
            fields.push(self.size(rw, i));
        }
        for i in 0..rank {
            fields.push(self.stride(rw, i));
        }
        fields
    }
}

/// A lowered unranked buffer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrankedMemRefDescriptor {
    value: ValueId,
}

impl UnrankedMemRefDescriptor {
    pub fn new(value: ValueId) -> Self {
        Self { value }
    }

    pub fn rank(self, rw: &mut Rewriter<'_>) -> ValueId {
        rw.extract_value(self.value, &[0])
    }

    pub fn memref_ptr(self, rw: &mut Rewriter<'_>) -> ValueId {
        rw.extract_value(self.value, &[1])
    }

    /// `[rank, descriptor pointer]`
    pub fn unpack(self, rw: &mut Rewriter<'_>) -> Vec<ValueId> {
        vec![self.rank(rw), self.memref_ptr(rw)]
    }
}
