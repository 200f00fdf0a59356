#![allow(dead_code)]

use gpulower::ir::{Module, OpKind, Operation, ValueId};
use gpulower::{lower_source, Diagnostic, LoweringOptions};

pub fn lower(source: &str) -> Module {
    lower_with(source, &LoweringOptions::default())
}

pub fn lower_with(source: &str, options: &LoweringOptions) -> Module {
    lower_source(source, options).unwrap_or_else(|diags| {
        panic!(
            "lowering should succeed, got {} errors: {:?}",
            diags.len(),
            diags.iter().map(|d| d.to_string()).collect::<Vec<_>>()
        )
    })
}

pub fn lower_errors(source: &str, options: &LoweringOptions) -> Vec<Diagnostic> {
    match lower_source(source, options) {
        Ok(m) => panic!("lowering should fail, got:\n{}", m),
        Err(diags) => diags,
    }
}

/// Runtime calls of `func`, one per line.
pub fn trace(m: &Module, func: &str) -> String {
    m.call_trace(func).join("\n")
}

pub fn ops(m: &Module) -> Vec<&Operation> {
    let mut ops = Vec::new();
    m.walk(&mut |op| ops.push(op));
    ops
}

/// Arguments of every call to `callee`, in program order.
pub fn calls_to(m: &Module, callee: &str) -> Vec<Vec<ValueId>> {
    ops(m)
        .into_iter()
        .filter_map(|op| match &op.kind {
            OpKind::Call {
                callee: c, args, ..
            } if c == callee => Some(args.clone()),
            _ => None,
        })
        .collect()
}

/// Values produced by calls to `callee`.
pub fn results_of(m: &Module, callee: &str) -> Vec<ValueId> {
    ops(m)
        .into_iter()
        .filter_map(|op| match &op.kind {
            OpKind::Call {
                callee: c,
                result: Some(r),
                ..
            } if c == callee => Some(*r),
            _ => None,
        })
        .collect()
}

pub fn count(m: &Module, pred: impl Fn(&OpKind) -> bool) -> usize {
    ops(m).into_iter().filter(|op| pred(&op.kind)).count()
}

pub const KERNELS: &str = r#"gpu.module @kernels attributes {gpu.binary = "BLOB"}
"#;
