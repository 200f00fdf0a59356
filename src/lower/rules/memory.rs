//! Buffer allocation, release, registration, copy and fill.

use crate::ir::{Dim, MemRefType, OpKind, Operation, Type, ValueId};
use crate::lower::descriptor::{MemRefDescriptor, UnrankedMemRefDescriptor};
use crate::lower::registry::{HOST_REGISTER, MEMCPY, MEMSET32, MEM_ALLOC, MEM_FREE};
use crate::lower::rewriter::{IndexValue, MatchFailure, Replacement, Rewriter, SIZE_OVERFLOW};

use super::{require_async_with_one_dependency, require_converted};

/// Ranked buffer type of `v`, or a decline naming `role`.
fn ranked(rw: &Rewriter<'_>, v: ValueId, role: &str) -> Result<MemRefType, MatchFailure> {
    match rw.ty(v) {
        Type::MemRef(m) => Ok(m.clone()),
        other => Err(MatchFailure::decline(format!(
            "{} must be a ranked buffer, found {}",
            role, other
        ))),
    }
}

fn ranked_with_identity_layout(
    rw: &Rewriter<'_>,
    v: ValueId,
    role: &str,
) -> Result<MemRefType, MatchFailure> {
    let ty = ranked(rw, v, role)?;
    if !ty.has_identity_layout() {
        return Err(MatchFailure::decline(format!(
            "{} layout is not the identity: {}",
            role,
            Type::MemRef(ty)
        )));
    }
    Ok(ty)
}

/// Element count of a buffer: folded for static shapes, otherwise read
/// from the descriptor as `stride[0] * size[0]`.
fn element_count(
    rw: &mut Rewriter<'_>,
    ty: &MemRefType,
    desc: MemRefDescriptor,
) -> Result<IndexValue, MatchFailure> {
    if ty.has_static_shape() {
        let n = ty
            .num_elements()
            .ok_or_else(|| MatchFailure::decline(SIZE_OVERFLOW))?;
        rw.static_byte_size(&rw.converter().convert_element(ty), n)?;
        return Ok(IndexValue::Const(n));
    }
    let stride = desc.stride(rw, 0);
    let size = desc.size(rw, 0);
    Ok(IndexValue::Value(rw.mul(stride, size)))
}

pub(super) fn alloc(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    let OpKind::Alloc { memref, .. } = &op.kind else {
        return Err(super::mismatch(super::Rule::Alloc));
    };
    require_converted(rw, operands)?;
    require_async_with_one_dependency(&op.kind)?;
    let ty = ranked_with_identity_layout(rw, *memref, "allocated buffer")?;

    let stream = operands[0];
    let mut dynamic = operands[1..].iter().copied();
    let mut sizes = Vec::with_capacity(ty.rank());
    for dim in &ty.shape {
        sizes.push(match dim {
            Dim::Static(n) => rw.checked_index(*n)?,
            Dim::Dynamic => IndexValue::Value(dynamic.next().ok_or_else(|| {
                MatchFailure::decline("fewer dynamic sizes than dynamic dimensions")
            })?),
        });
    }

    // Row-major strides; the running product ends as the element count.
    let mut strides = vec![IndexValue::Const(1); ty.rank()];
    let mut running = IndexValue::Const(1);
    for i in (0..ty.rank()).rev() {
        strides[i] = running;
        running = rw.mul_index(running, sizes[i])?;
    }
    if let IndexValue::Const(n) = running {
        rw.static_byte_size(&rw.converter().convert_element(&ty), n)?;
    }

    let elem_ptr = rw.converter().element_ptr_type(&ty);
    let size_bytes = rw.size_in_bytes(elem_ptr.clone(), running);
    let raw = rw.call_value(&MEM_ALLOC, &[size_bytes, stream]);
    let data = rw.bitcast(raw, elem_ptr);

    let offset = rw.index_const(0);
    let sizes: Vec<ValueId> = sizes.into_iter().map(|s| rw.materialize(s)).collect();
    let strides: Vec<ValueId> = strides.into_iter().map(|s| rw.materialize(s)).collect();
    let desc = MemRefDescriptor::build(rw, &ty, data, data, offset, &sizes, &strides);
    Ok(Replacement::Values(vec![desc.value(), stream]))
}

pub(super) fn dealloc(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    let OpKind::Dealloc { memref, .. } = &op.kind else {
        return Err(super::mismatch(super::Rule::Dealloc));
    };
    require_converted(rw, operands)?;
    require_async_with_one_dependency(&op.kind)?;
    ranked(rw, *memref, "released buffer")?;

    let (stream, desc) = (operands[0], MemRefDescriptor::new(operands[1]));
    let allocated = desc.allocated_ptr(rw);
    let ptr = rw.bitcast(allocated, Type::i8_ptr());
    rw.call_void(&MEM_FREE, &[ptr, stream]);
    Ok(Replacement::Values(vec![stream]))
}

pub(super) fn host_register(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    let OpKind::HostRegister { value } = &op.kind else {
        return Err(super::mismatch(super::Rule::HostRegister));
    };
    require_converted(rw, operands)?;
    let elem = match rw.ty(*value) {
        Type::UnrankedMemRef(elem) => rw.converter().convert(elem),
        other => {
            return Err(MatchFailure::decline(format!(
                "operand must be an unranked buffer, found {}",
                other
            )))
        }
    };

    let parts = UnrankedMemRefDescriptor::new(operands[0]).unpack(rw);
    let elem_size = rw.size_in_bytes(Type::ptr(elem), IndexValue::Const(1));
    rw.call_void(&HOST_REGISTER, &[parts[0], parts[1], elem_size]);
    Ok(Replacement::Erase)
}

pub(super) fn memcpy(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    let OpKind::Memcpy { dst, src, .. } = &op.kind else {
        return Err(super::mismatch(super::Rule::Memcpy));
    };
    require_converted(rw, operands)?;
    require_async_with_one_dependency(&op.kind)?;
    let src_ty = ranked_with_identity_layout(rw, *src, "source buffer")?;
    ranked(rw, *dst, "destination buffer")?;

    let stream = operands[0];
    let dst_desc = MemRefDescriptor::new(operands[1]);
    let src_desc = MemRefDescriptor::new(operands[2]);

    let count = element_count(rw, &src_ty, src_desc)?;
    let elem_ptr = rw.converter().element_ptr_type(&src_ty);
    let size_bytes = rw.size_in_bytes(elem_ptr, count);

    let src_data = src_desc.aligned_ptr(rw);
    let src_ptr = rw.bitcast(src_data, Type::i8_ptr());
    let dst_data = dst_desc.aligned_ptr(rw);
    let dst_ptr = rw.bitcast(dst_data, Type::i8_ptr());
    rw.call_void(&MEMCPY, &[dst_ptr, src_ptr, size_bytes, stream]);
    Ok(Replacement::Values(vec![stream]))
}

pub(super) fn memset(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    let OpKind::Memset { dst, .. } = &op.kind else {
        return Err(super::mismatch(super::Rule::Memset));
    };
    require_converted(rw, operands)?;
    require_async_with_one_dependency(&op.kind)?;

    let value = operands[2];
    match rw.ty(value).scalar_width() {
        Some(32) => {}
        Some(bits) => {
            return Err(MatchFailure::decline(format!(
                "value must be a 32-bit scalar, got {} bits",
                bits
            )))
        }
        None => {
            return Err(MatchFailure::decline(format!(
                "value must be a 32-bit scalar, got {}",
                rw.ty(value)
            )))
        }
    }
    let dst_ty = ranked_with_identity_layout(rw, *dst, "destination buffer")?;

    let stream = operands[0];
    let dst_desc = MemRefDescriptor::new(operands[1]);
    let count = element_count(rw, &dst_ty, dst_desc)?;
    let count = rw.materialize(count);
    let bits = rw.bitcast(value, Type::Int(32));
    let dst_data = dst_desc.aligned_ptr(rw);
    let dst_ptr = rw.bitcast(dst_data, Type::i8_ptr());
    rw.call_void(&MEMSET32, &[dst_ptr, bits, count, stream]);
    Ok(Replacement::Values(vec![stream]))
}
