//! GPU dialect to runtime-call lowering.
//!
//! [`lower_module`] rewrites every GPU dialect operation of a module into
//! calls to the `mgpu*` runtime and re-types the structural operations
//! around them. The conversion is partial and iterative: each sweep visits
//! the remaining illegal operations in program order and tries the rules
//! registered for them; the run ends when a sweep changes nothing. Any
//! operation still illegal at that point fails the whole pass, and the
//! error lists every rule's reason for each one.

pub mod descriptor;
pub mod handles;
pub mod launch;
pub mod registry;
pub mod rewriter;
pub mod rules;
pub mod types;

use std::collections::{HashMap, HashSet};

use crate::config::{ConfigError, LoweringOptions};
use crate::diagnostic::Diagnostic;
use crate::ir::{Module, OpId, OpKind, Operation, ValueDef, ValueId};
use crate::span::Span;

pub use handles::HandleKind;
pub use registry::{CallRegistry, CallSignature, RUNTIME_ABI};
pub use rewriter::{MatchFailure, Replacement};
pub use rules::Rule;
pub use types::TypeConverter;

use rewriter::{Edits, Rewriter};

#[derive(Debug, thiserror::Error)]
pub enum LoweringError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to lower the module ({} diagnostic(s))", .diagnostics.len())]
    Legalization { diagnostics: Vec<Diagnostic> },
}

impl LoweringError {
    /// Diagnostics ready for rendering. Option errors have no location.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            LoweringError::Config(err) => vec![Diagnostic::error(err.to_string(), Span::dummy())],
            LoweringError::Legalization { diagnostics } => diagnostics.clone(),
        }
    }
}

/// Statistics of one successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoweringStats {
    pub sweeps: usize,
    pub converted: usize,
    pub runtime_functions: usize,
}

/// Lower `module` with `options`.
pub fn lower_module(module: Module, options: &LoweringOptions) -> Result<Module, LoweringError> {
    lower_module_with_stats(module, options).map(|(module, _)| module)
}

pub fn lower_module_with_stats(
    module: Module,
    options: &LoweringOptions,
) -> Result<(Module, LoweringStats), LoweringError> {
    options.validate()?;
    let mut driver = Driver::new(module, options);
    driver.convert_signatures();
    driver.run();
    driver.finish()
}

/// Whether `op` is acceptable in lowered output.
pub fn is_legal(module: &Module, converter: &TypeConverter, op: &Operation) -> bool {
    let legal = |v: &ValueId| converter.is_legal(module.ty(*v));
    match &op.kind {
        kind if kind.is_gpu() => false,
        OpKind::Constant { result, .. } => legal(result),
        OpKind::Execute { results, .. } => results.iter().all(legal),
        OpKind::Await { operand, result } => legal(operand) && legal(result),
        OpKind::Yield { operands } | OpKind::Return { operands } => operands.iter().all(legal),
        _ => true,
    }
}

/// Operations the pass would rewrite, in program order.
pub fn pending_conversions<'m>(module: &'m Module, options: &LoweringOptions) -> Vec<&'m Operation> {
    let converter = TypeConverter::new(options.index_bitwidth);
    let mut pending = Vec::new();
    module.walk(&mut |op| {
        if !is_legal(module, &converter, op) {
            pending.push(op);
        }
    });
    pending
}

struct Driver<'a> {
    module: Module,
    options: &'a LoweringOptions,
    converter: TypeConverter,
    registry: CallRegistry,
    /// Original value → replacement. Chains are followed on lookup.
    mapping: HashMap<ValueId, ValueId>,
    /// Latest decline reasons per operation, as `(rule, reason)`.
    reasons: HashMap<OpId, Vec<(Rule, String)>>,
    /// Operations with a final failure; never retried.
    failed: HashSet<OpId>,
    diagnostics: Vec<Diagnostic>,
    stats: LoweringStats,
}

impl<'a> Driver<'a> {
    fn new(module: Module, options: &'a LoweringOptions) -> Self {
        Self {
            module,
            options,
            converter: TypeConverter::new(options.index_bitwidth),
            registry: CallRegistry::new(options.index_bitwidth),
            mapping: HashMap::new(),
            reasons: HashMap::new(),
            failed: HashSet::new(),
            diagnostics: Vec::new(),
            stats: LoweringStats::default(),
        }
    }

    fn lookup(&self, mut v: ValueId) -> ValueId {
        while let Some(&next) = self.mapping.get(&v) {
            if next == v {
                break;
            }
            v = next;
        }
        v
    }

    /// Function arguments take their lowered types before any rule runs.
    fn convert_signatures(&mut self) {
        for f in 0..self.module.funcs.len() {
            for a in 0..self.module.funcs[f].args.len() {
                let old = self.module.funcs[f].args[a];
                let info = self.module.value(old);
                if self.converter.is_legal(&info.ty) {
                    continue;
                }
                let ty = self.converter.convert(&info.ty);
                let name = info.name.clone();
                let new = match name {
                    Some(name) => self.module.new_named_value(ty, ValueDef::Arg, &name),
                    None => self.module.new_value(ty, ValueDef::Arg),
                };
                self.module.funcs[f].args[a] = new;
                self.mapping.insert(old, new);
            }
        }
    }

    fn illegal_ops(&self) -> Vec<OpId> {
        let mut ids = Vec::new();
        self.module.walk(&mut |op| {
            if !is_legal(&self.module, &self.converter, op) {
                ids.push(op.id);
            }
        });
        ids
    }

    fn run(&mut self) {
        loop {
            self.stats.sweeps += 1;
            let mut changed = false;
            for id in self.illegal_ops() {
                if self.failed.contains(&id) {
                    continue;
                }
                changed |= self.try_convert(id);
            }
            if !changed {
                break;
            }
        }
    }

    /// Try every matching rule on `id`; true if one applied.
    fn try_convert(&mut self, id: OpId) -> bool {
        let Some(found) = self.module.find_op(id) else {
            return false;
        };
        if found.erased || is_legal(&self.module, &self.converter, found) {
            return false;
        }
        let op = Operation::new(id, found.kind.header(), found.span);
        let operands: Vec<ValueId> = op.kind.operands().into_iter().map(|v| self.lookup(v)).collect();

        let mut reasons = Vec::new();
        for rule in Rule::candidates(&op.kind) {
            let mut rw = Rewriter::new(&mut self.module, self.converter, self.options, op.span);
            match rule.apply(&mut rw, &op, &operands) {
                Ok(replacement) => {
                    let edits = rw.finish();
                    tracing::debug!(
                        rule = rule.name(),
                        op = op.kind.name(),
                        emitted = edits.op_count(),
                        "applied"
                    );
                    self.commit(&op, edits, replacement);
                    self.reasons.remove(&id);
                    self.stats.converted += 1;
                    return true;
                }
                Err(failure) => {
                    tracing::debug!(
                        rule = rule.name(),
                        op = op.kind.name(),
                        reason = %failure.reason,
                        "declined"
                    );
                    reasons.push((rule, failure.reason));
                    if let Some(diagnostic) = failure.diagnostic {
                        self.diagnostics.push(diagnostic);
                        self.failed.insert(id);
                        break;
                    }
                }
            }
        }
        self.reasons.insert(id, reasons);
        false
    }

    fn insert(&mut self, anchor: OpId, ops: &mut Vec<Operation>, after: bool) -> bool {
        self.module
            .funcs
            .iter_mut()
            .any(|f| f.body.insert_next_to(anchor, ops, after))
    }

    fn commit(&mut self, op: &Operation, edits: Edits, replacement: Replacement) {
        for sig in edits.runtime_calls {
            self.registry.get_or_create(&mut self.module, sig);
        }
        for global in edits.globals {
            if self.module.global(&global.name).is_none() {
                self.module.globals.push(global);
            }
        }
        for (anchor, mut ops) in edits.after {
            if !self.insert(anchor, &mut ops, true) {
                self.insert(op.id, &mut ops, false);
            }
        }
        let mut before = edits.before;
        if !before.is_empty() {
            self.insert(op.id, &mut before, false);
        }

        match replacement {
            Replacement::Values(values) => {
                let results = op.kind.results();
                debug_assert_eq!(results.len(), values.len());
                for (old, new) in results.into_iter().zip(values) {
                    self.mapping.insert(old, new);
                }
                self.erase(op.id);
            }
            Replacement::Erase => {
                debug_assert!(op.kind.results().is_empty());
                self.erase(op.id);
            }
            Replacement::Update { operands, results } => {
                let Some(target) = self.module.find_op_mut(op.id) else {
                    return;
                };
                if let Some(operands) = operands {
                    for (slot, new) in target.kind.operand_slots().into_iter().zip(operands) {
                        *slot = new;
                    }
                }
                if let Some(results) = results {
                    for (slot, new) in target.kind.result_slots().into_iter().zip(results) {
                        self.mapping.insert(*slot, new);
                        *slot = new;
                    }
                }
            }
        }
    }

    fn erase(&mut self, id: OpId) {
        if let Some(op) = self.module.find_op_mut(id) {
            op.erased = true;
        }
    }

    fn finish(mut self) -> Result<(Module, LoweringStats), LoweringError> {
        let remaining = self.illegal_ops();
        if !remaining.is_empty() {
            let mut diagnostics = std::mem::take(&mut self.diagnostics);
            for id in remaining {
                let Some(op) = self.module.find_op(id) else {
                    continue;
                };
                let mut diag = Diagnostic::error(
                    format!("failed to legalize operation '{}'", op.kind.name()),
                    op.span,
                );
                match self.reasons.get(&id) {
                    Some(reasons) if !reasons.is_empty() => {
                        for (rule, reason) in reasons {
                            diag = diag.with_note(format!("{}: {}", rule, reason));
                        }
                    }
                    _ => diag = diag.with_note("no lowering rule applies".to_string()),
                }
                diagnostics.push(diag);
            }
            tracing::info!(
                sweeps = self.stats.sweeps,
                converted = self.stats.converted,
                failed = diagnostics.len(),
                "lowering failed"
            );
            return Err(LoweringError::Legalization { diagnostics });
        }

        // Blobs now live in globals.
        self.module.gpu_modules.clear();
        let mapping = std::mem::take(&mut self.mapping);
        let resolve = |mut v: ValueId| {
            while let Some(&next) = mapping.get(&v) {
                if next == v {
                    break;
                }
                v = next;
            }
            v
        };
        for func in &mut self.module.funcs {
            func.body.walk_mut(&mut |op| {
                for slot in op.kind.operand_slots() {
                    *slot = resolve(*slot);
                }
            });
            func.body.purge_erased();
        }

        self.stats.runtime_functions = self.registry.len();
        tracing::info!(
            sweeps = self.stats.sweeps,
            converted = self.stats.converted,
            runtime_functions = self.stats.runtime_functions,
            "lowered module"
        );
        Ok((self.module, self.stats))
    }
}

#[cfg(test)]
mod tests;
