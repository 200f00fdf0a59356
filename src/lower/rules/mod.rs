//! Per-operation lowering rules.
//!
//! Each [`Rule`] handles one operation tag. A rule either returns a
//! [`Replacement`] (having emitted its runtime calls through the
//! [`Rewriter`]) or a [`MatchFailure`] saying why it did not apply. Rules
//! never call each other; they only see the operation, its remapped
//! operands and the module.

mod device;
mod memory;
mod structural;
mod sync;

use crate::ir::{OpKind, Operation, ValueId};

use super::launch;
use super::rewriter::{MatchFailure, Replacement, Rewriter};

pub(crate) const NOT_CONVERTED: &str = "operands are not of runtime type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    Alloc,
    Dealloc,
    HostRegister,
    Memcpy,
    Memset,
    SetDefaultDevice,
    Wait,
    WaitAsync,
    Yield,
    LaunchFunc,
    Constant,
    Execute,
    Await,
    Terminator,
}

impl Rule {
    /// Every rule, in the order the driver tries them.
    pub const ALL: [Rule; 14] = [
        Rule::Alloc,
        Rule::Dealloc,
        Rule::HostRegister,
        Rule::Memcpy,
        Rule::Memset,
        Rule::SetDefaultDevice,
        Rule::Wait,
        Rule::WaitAsync,
        Rule::Yield,
        Rule::LaunchFunc,
        Rule::Constant,
        Rule::Execute,
        Rule::Await,
        Rule::Terminator,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Rule::Alloc => "gpu.alloc",
            Rule::Dealloc => "gpu.dealloc",
            Rule::HostRegister => "gpu.host_register",
            Rule::Memcpy => "gpu.memcpy",
            Rule::Memset => "gpu.memset",
            Rule::SetDefaultDevice => "gpu.set_default_device",
            Rule::Wait => "gpu.wait",
            Rule::WaitAsync => "gpu.wait async",
            Rule::Yield => "async.yield",
            Rule::LaunchFunc => "gpu.launch_func",
            Rule::Constant => "constant",
            Rule::Execute => "async.execute",
            Rule::Await => "async.await",
            Rule::Terminator => "terminator",
        }
    }

    pub fn matches(self, kind: &OpKind) -> bool {
        matches!(
            (self, kind),
            (Rule::Alloc, OpKind::Alloc { .. })
                | (Rule::Dealloc, OpKind::Dealloc { .. })
                | (Rule::HostRegister, OpKind::HostRegister { .. })
                | (Rule::Memcpy, OpKind::Memcpy { .. })
                | (Rule::Memset, OpKind::Memset { .. })
                | (Rule::SetDefaultDevice, OpKind::SetDefaultDevice { .. })
                | (Rule::Wait, OpKind::Wait { .. })
                | (Rule::WaitAsync, OpKind::Wait { .. })
                | (Rule::Yield, OpKind::Yield { .. })
                | (Rule::LaunchFunc, OpKind::LaunchFunc(_))
                | (Rule::Constant, OpKind::Constant { .. })
                | (Rule::Execute, OpKind::Execute { .. })
                | (Rule::Await, OpKind::Await { .. })
                | (Rule::Terminator, OpKind::Yield { .. } | OpKind::Return { .. })
        )
    }

    /// Rules that can handle `kind`, in trial order.
    pub fn candidates(kind: &OpKind) -> impl Iterator<Item = Rule> + '_ {
        Rule::ALL.into_iter().filter(move |rule| rule.matches(kind))
    }

    /// Try the rule on `op`. `operands` are the op's operands, in
    /// `OpKind::operands` order, with every value already lowered replaced
    /// by its lowered form.
    pub fn apply(
        self,
        rw: &mut Rewriter<'_>,
        op: &Operation,
        operands: &[ValueId],
    ) -> Result<Replacement, MatchFailure> {
        debug_assert!(self.matches(&op.kind));
        match self {
            Rule::Alloc => memory::alloc(rw, op, operands),
            Rule::Dealloc => memory::dealloc(rw, op, operands),
            Rule::HostRegister => memory::host_register(rw, op, operands),
            Rule::Memcpy => memory::memcpy(rw, op, operands),
            Rule::Memset => memory::memset(rw, op, operands),
            Rule::SetDefaultDevice => device::set_default_device(rw, operands),
            Rule::Wait => sync::wait(rw, op, operands),
            Rule::WaitAsync => sync::wait_async(rw, op, operands),
            Rule::Yield => sync::async_yield(rw, op, operands),
            Rule::LaunchFunc => match &op.kind {
                OpKind::LaunchFunc(l) => launch::lower_launch(rw, l, operands),
                _ => Err(mismatch(self)),
            },
            Rule::Constant => structural::constant(rw, op),
            Rule::Execute => structural::execute(rw, op),
            Rule::Await => structural::await_value(rw, op, operands),
            Rule::Terminator => structural::terminator(rw, op, operands),
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn mismatch(rule: Rule) -> MatchFailure {
    MatchFailure::decline(format!("not a '{}' operation", rule.name()))
}

// ─── Shared preconditions ─────────────────────────────────────────

/// Every operand already has a lowered type.
pub(crate) fn require_converted(
    rw: &Rewriter<'_>,
    operands: &[ValueId],
) -> Result<(), MatchFailure> {
    if operands.iter().all(|&v| rw.is_converted(v)) {
        Ok(())
    } else {
        Err(MatchFailure::decline(NOT_CONVERTED))
    }
}

/// Exactly one async dependency and an async result token.
fn require_async_with_one_dependency(kind: &OpKind) -> Result<(), MatchFailure> {
    if kind.async_deps().len() != 1 {
        return Err(MatchFailure::decline(format!(
            "requires exactly one async dependency, found {}",
            kind.async_deps().len()
        )));
    }
    if kind.async_token().is_none() {
        return Err(MatchFailure::decline("can convert only the async version"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, ValueId};

    #[test]
    fn test_candidates() {
        let wait = OpKind::Wait {
            token: None,
            deps: vec![],
        };
        let rules: Vec<Rule> = Rule::candidates(&wait).collect();
        assert_eq!(rules, vec![Rule::Wait, Rule::WaitAsync]);

        let yield_op = OpKind::Yield { operands: vec![] };
        let rules: Vec<Rule> = Rule::candidates(&yield_op).collect();
        assert_eq!(rules, vec![Rule::Yield, Rule::Terminator]);

        let exec = OpKind::Execute {
            results: vec![ValueId(0)],
            body: Block::default(),
        };
        assert_eq!(Rule::candidates(&exec).count(), 1);
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<&str> = Rule::ALL.iter().map(|r| r.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Rule::ALL.len());
    }

    #[test]
    fn test_dependency_count_reason() {
        let kind = OpKind::Wait {
            token: Some(ValueId(0)),
            deps: vec![ValueId(1), ValueId(2)],
        };
        let err = require_async_with_one_dependency(&kind).unwrap_err();
        assert_eq!(err.reason, "requires exactly one async dependency, found 2");
        assert!(!err.is_hard());
    }
}
