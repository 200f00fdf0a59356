//! Host waits and cross-stream ordering.
//!
//! A lowered token is a stream if `mgpuStreamCreate` produced it and an
//! event otherwise (see [`HandleKind`]). Waiting on a stream synchronizes
//! and destroys it; waiting on an event does the same with event calls.

use crate::ir::{OpKind, Operation, Type, ValueId};
use crate::lower::handles::HandleKind;
use crate::lower::registry::{
    EVENT_CREATE, EVENT_DESTROY, EVENT_RECORD, EVENT_SYNCHRONIZE, STREAM_CREATE, STREAM_DESTROY,
    STREAM_SYNCHRONIZE, STREAM_WAIT_EVENT,
};
use crate::lower::rewriter::{MatchFailure, Replacement, Rewriter};

use super::require_converted;

/// `gpu.wait [%a, %b]`: block the host on every dependency.
pub(super) fn wait(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    if op.kind.async_token().is_some() {
        return Err(MatchFailure::decline("produces an async token"));
    }
    require_converted(rw, operands)?;

    let mut handles: Vec<ValueId> = Vec::with_capacity(operands.len());
    for &handle in operands {
        if !handles.contains(&handle) {
            handles.push(handle);
        }
    }
    for handle in handles {
        match HandleKind::of(rw.module(), handle) {
            HandleKind::Stream => {
                rw.call_void(&STREAM_SYNCHRONIZE, &[handle]);
                rw.call_void(&STREAM_DESTROY, &[handle]);
            }
            HandleKind::Event => {
                rw.call_void(&EVENT_SYNCHRONIZE, &[handle]);
                rw.call_void(&EVENT_DESTROY, &[handle]);
            }
        }
    }
    Ok(Replacement::Erase)
}

/// `%t = gpu.wait async [%a, %b]`: a fresh stream ordered after every
/// dependency.
pub(super) fn wait_async(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    if op.kind.async_token().is_none() {
        return Err(MatchFailure::decline("does not produce an async token"));
    }
    require_converted(rw, operands)?;

    let mut events = Vec::with_capacity(operands.len());
    let mut created = Vec::new();
    for (&dep, &handle) in op.kind.async_deps().iter().zip(operands) {
        if !HandleKind::is_stream(rw.module(), handle) {
            events.push(handle);
            continue;
        }
        // The event marks where the dependency was issued on its stream.
        match rw.module().value(dep).def.op() {
            Some(producer) => rw.set_insertion_after(producer),
            None => rw.reset_insertion(),
        }
        let event = rw.call_value(&EVENT_CREATE, &[]);
        rw.call_void(&EVENT_RECORD, &[event, handle]);
        events.push(event);
        created.push(event);
    }
    rw.reset_insertion();

    let stream = rw.call_value(&STREAM_CREATE, &[]);
    for &event in &events {
        rw.call_void(&STREAM_WAIT_EVENT, &[stream, event]);
    }
    for &event in &created {
        rw.call_void(&EVENT_DESTROY, &[event]);
    }
    Ok(Replacement::Values(vec![stream]))
}

/// `async.yield` of GPU tokens: each stream is handed out of the region as
/// an event recorded on it, and the streams are released.
pub(super) fn async_yield(
    rw: &mut Rewriter<'_>,
    op: &Operation,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    let OpKind::Yield { operands: original } = &op.kind else {
        return Err(super::mismatch(super::Rule::Yield));
    };
    let token_slots: Vec<usize> = original
        .iter()
        .enumerate()
        .filter(|(_, v)| rw.ty(**v).is_token())
        .map(|(i, _)| i)
        .collect();
    if token_slots.is_empty() {
        return Err(MatchFailure::decline("no gpu async token operand"));
    }
    require_converted(rw, operands)?;

    let mut new_operands = operands.to_vec();
    let mut streams: Vec<ValueId> = Vec::new();
    for i in token_slots {
        let stream = operands[i];
        let event = rw.call_value(&EVENT_CREATE, &[]);
        rw.call_void(&EVENT_RECORD, &[event, stream]);
        new_operands[i] = event;
        if !streams.contains(&stream) {
            streams.push(stream);
        }
    }
    for stream in streams {
        rw.call_void(&STREAM_DESTROY, &[stream]);
    }
    debug_assert!(new_operands.iter().all(|&v| *rw.ty(v) != Type::Token));
    Ok(Replacement::Update {
        operands: Some(new_operands),
        results: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoweringOptions;
    use crate::ir::{Module, ValueDef};
    use crate::lower::types::TypeConverter;
    use crate::span::Span;

    fn handle(m: &mut Module, callee: &str) -> ValueId {
        let op = m.fresh_op_id();
        m.new_value(
            Type::i8_ptr(),
            ValueDef::Call {
                op,
                callee: callee.into(),
            },
        )
    }

    fn token(m: &mut Module) -> ValueId {
        let op = m.fresh_op_id();
        m.new_value(Type::Token, ValueDef::Result { op, index: 0 })
    }

    #[test]
    fn test_wait_async_mixed_operands() {
        let mut m = Module::new();
        let (dep_a, dep_b) = (token(&mut m), token(&mut m));
        let stream = handle(&mut m, "mgpuStreamCreate");
        let event = handle(&mut m, "mgpuEventCreate");
        let out = token(&mut m);
        let id = m.fresh_op_id();
        let op = Operation::new(
            id,
            OpKind::Wait {
                token: Some(out),
                deps: vec![dep_a, dep_b],
            },
            Span::dummy(),
        );
        let options = LoweringOptions::default();
        let mut rw = Rewriter::new(&mut m, TypeConverter::new(64), &options, Span::dummy());
        let replacement = wait_async(&mut rw, &op, &[stream, event]).unwrap();
        let edits = rw.finish();

        // event-create + event-record go after the first dependency's producer
        assert_eq!(edits.after.len(), 1);
        assert_eq!(edits.after[0].1.len(), 2);

        let names: Vec<&str> = edits
            .before
            .iter()
            .filter_map(|op| match &op.kind {
                OpKind::Call { callee, .. } => Some(callee.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "mgpuStreamCreate",
                "mgpuStreamWaitEvent",
                "mgpuStreamWaitEvent",
                "mgpuEventDestroy"
            ]
        );
        assert!(matches!(replacement, Replacement::Values(v) if v.len() == 1));
    }

    #[test]
    fn test_wait_declines_async_form() {
        let mut m = Module::new();
        let out = token(&mut m);
        let id = m.fresh_op_id();
        let op = Operation::new(
            id,
            OpKind::Wait {
                token: Some(out),
                deps: vec![],
            },
            Span::dummy(),
        );
        let options = LoweringOptions::default();
        let mut rw = Rewriter::new(&mut m, TypeConverter::new(64), &options, Span::dummy());
        let err = wait(&mut rw, &op, &[]).unwrap_err();
        assert_eq!(err.reason, "produces an async token");
    }

    #[test]
    fn test_yield_destroys_shared_stream_once() {
        let mut m = Module::new();
        let (a, b) = (token(&mut m), token(&mut m));
        let stream = handle(&mut m, "mgpuStreamCreate");
        let id = m.fresh_op_id();
        let op = Operation::new(
            id,
            OpKind::Yield {
                operands: vec![a, b],
            },
            Span::dummy(),
        );
        let options = LoweringOptions::default();
        let mut rw = Rewriter::new(&mut m, TypeConverter::new(64), &options, Span::dummy());
        let replacement = async_yield(&mut rw, &op, &[stream, stream]).unwrap();
        let edits = rw.finish();
        let destroys = edits
            .before
            .iter()
            .filter(|op| matches!(&op.kind, OpKind::Call { callee, .. } if callee == "mgpuStreamDestroy"))
            .count();
        assert_eq!(destroys, 1);
        match replacement {
            Replacement::Update {
                operands: Some(ops),
                results: None,
            } => {
                assert_eq!(ops.len(), 2);
                assert_ne!(ops[0], ops[1]);
                assert!(!ops.contains(&stream));
            }
            other => panic!("unexpected replacement {:?}", other),
        }
    }
}
