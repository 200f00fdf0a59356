//! Re-typing of operations that survive lowering.
//!
//! These ops are kept in place; only their result types change, or their
//! operands are swapped for the lowered values.

use crate::ir::{OpKind, Operation, ValueId};
use crate::lower::rewriter::{MatchFailure, Replacement, Rewriter};

use super::require_converted;

/// Fresh results of the lowered types, or `None` when nothing changes.
fn retyped_results(rw: &mut Rewriter<'_>, op: &Operation) -> Option<Vec<ValueId>> {
    let results = op.kind.results();
    if results.iter().all(|&r| rw.is_converted(r)) {
        return None;
    }
    let converter = rw.converter();
    let retyped = results
        .iter()
        .enumerate()
        .map(|(i, &r)| {
            let ty = converter.convert(rw.ty(r));
            rw.retyped_result(op.id, i as u32, ty)
        })
        .collect();
    Some(retyped)
}

/// `constant 4 : index` becomes `constant 4 : i64`.
pub(super) fn constant(rw: &mut Rewriter<'_>, op: &Operation) -> Result<Replacement, MatchFailure> {
    match retyped_results(rw, op) {
        Some(results) => Ok(Replacement::Update {
            operands: None,
            results: Some(results),
        }),
        None => Err(MatchFailure::decline("already of runtime type")),
    }
}

/// `async.execute` results carrying GPU tokens become results carrying
/// handles. The region is converted op by op on its own.
pub(super) fn execute(rw: &mut Rewriter<'_>, op: &Operation) -> Result<Replacement, MatchFailure> {
    match retyped_results(rw, op) {
        Some(results) => Ok(Replacement::Update {
            operands: None,
            results: Some(results),
        }),
        None => Err(MatchFailure::decline("already of runtime type")),
    }
}

pub(super) fn await_value(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    require_converted(rw, operands)?;
    let results = retyped_results(rw, op);
    Ok(Replacement::Update {
        operands: Some(operands.to_vec()),
        results,
    })
}

/// `return` and token-free `async.yield`: take the lowered operands.
pub(super) fn terminator(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    if matches!(op.kind, OpKind::Yield { .. })
        && op.kind.operands().iter().any(|&v| rw.ty(v).is_token())
    {
        return Err(MatchFailure::decline("gpu async tokens must be yielded as events"));
    }
    require_converted(rw, operands)?;
    Ok(Replacement::Update {
        operands: Some(operands.to_vec()),
        results: None,
    })
}
