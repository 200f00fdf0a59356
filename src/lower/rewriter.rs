//! The rewriter a lowering rule emits through.
//!
//! Rules never touch the operation list directly. Every operation a rule
//! builds is collected in [`Edits`]; the driver splices them in only when
//! the rule returns `Ok`. A declined rule leaves the function bodies
//! exactly as they were (the value arena may have grown, which is
//! harmless).

use crate::config::LoweringOptions;
use crate::diagnostic::Diagnostic;
use crate::ir::{GepIndex, Global, Literal, Module, OpId, OpKind, Operation, Type, ValueDef, ValueId};
use crate::span::Span;

use super::registry::CallSignature;
use super::types::TypeConverter;

/// What a successful rule does with the operation it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// Replace each result, in order, with the given value and erase the op.
    Values(Vec<ValueId>),
    /// Erase an operation without results.
    Erase,
    /// Keep the operation, swapping in new operands and/or new results.
    Update {
        operands: Option<Vec<ValueId>>,
        results: Option<Vec<ValueId>>,
    },
}

/// Why a rule did not apply.
///
/// A plain decline leaves the operation for another rule or a later sweep.
/// A failure carrying a diagnostic is final: the operation is not retried
/// and the diagnostic is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFailure {
    pub reason: String,
    pub diagnostic: Option<Diagnostic>,
}

impl MatchFailure {
    pub fn decline(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            diagnostic: None,
        }
    }

    pub fn hard(diagnostic: Diagnostic) -> Self {
        Self {
            reason: diagnostic.message.clone(),
            diagnostic: Some(diagnostic),
        }
    }

    pub fn is_hard(&self) -> bool {
        self.diagnostic.is_some()
    }
}

/// Operations and declarations a rule produced, not yet committed.
#[derive(Debug, Default)]
pub struct Edits {
    /// Goes immediately before the matched operation.
    pub before: Vec<Operation>,
    /// Goes immediately after another operation.
    pub after: Vec<(OpId, Vec<Operation>)>,
    pub runtime_calls: Vec<&'static CallSignature>,
    pub globals: Vec<Global>,
}

impl Edits {
    pub fn op_count(&self) -> usize {
        self.before.len() + self.after.iter().map(|(_, ops)| ops.len()).sum::<usize>()
    }
}

/// Decline reason for a static size the index type cannot hold.
pub const SIZE_OVERFLOW: &str = "static buffer size overflows the index type";

/// An index-typed quantity that may still be a compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexValue {
    Const(u64),
    Value(ValueId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Insertion {
    BeforeMatched,
    After(OpId),
}

pub struct Rewriter<'a> {
    module: &'a mut Module,
    converter: TypeConverter,
    options: &'a LoweringOptions,
    span: Span,
    insertion: Insertion,
    edits: Edits,
}

impl<'a> Rewriter<'a> {
    pub fn new(
        module: &'a mut Module,
        converter: TypeConverter,
        options: &'a LoweringOptions,
        span: Span,
    ) -> Self {
        Self {
            module,
            converter,
            options,
            span,
            insertion: Insertion::BeforeMatched,
            edits: Edits::default(),
        }
    }

    pub fn finish(self) -> Edits {
        self.edits
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn converter(&self) -> TypeConverter {
        self.converter
    }

    pub fn options(&self) -> &LoweringOptions {
        self.options
    }

    /// Location of the matched operation.
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn ty(&self, v: ValueId) -> &Type {
        self.module.ty(v)
    }

    /// Whether `v` already has a lowered type.
    pub fn is_converted(&self, v: ValueId) -> bool {
        self.converter.is_legal(self.module.ty(v))
    }

    pub fn index_type(&self) -> Type {
        self.converter.index_type()
    }

    // ─── Insertion point ──────────────────────────────────────────

    /// Emit after `op` until reset.
    pub fn set_insertion_after(&mut self, op: OpId) {
        self.insertion = Insertion::After(op);
    }

    /// Emit in front of the matched operation again.
    pub fn reset_insertion(&mut self) {
        self.insertion = Insertion::BeforeMatched;
    }

    fn push(&mut self, id: OpId, kind: OpKind) {
        let op = Operation::new(id, kind, self.span);
        match self.insertion {
            Insertion::BeforeMatched => self.edits.before.push(op),
            Insertion::After(anchor) => match self.edits.after.last_mut() {
                Some((last, ops)) if *last == anchor => ops.push(op),
                _ => self.edits.after.push((anchor, vec![op])),
            },
        }
    }

    /// Allocate an op id together with its single result.
    fn new_result(&mut self, ty: Type) -> (OpId, ValueId) {
        let op = self.module.fresh_op_id();
        let result = self.module.new_value(ty, ValueDef::Result { op, index: 0 });
        (op, result)
    }

    /// A fresh value standing for result `index` of an operation that is
    /// kept and updated in place.
    pub fn retyped_result(&mut self, op: OpId, index: u32, ty: Type) -> ValueId {
        self.module.new_value(ty, ValueDef::Result { op, index })
    }

    // ─── Runtime calls ────────────────────────────────────────────

    pub fn call_value(&mut self, sig: &'static CallSignature, args: &[ValueId]) -> ValueId {
        debug_assert!(sig.returns_value(), "{} returns void", sig.name);
        debug_assert_eq!(args.len(), sig.params.len(), "arity of {}", sig.name);
        self.edits.runtime_calls.push(sig);
        let op = self.module.fresh_op_id();
        let ty = sig.ret.lower(self.converter.index_bits());
        let result = self.module.new_value(
            ty,
            ValueDef::Call {
                op,
                callee: sig.name.to_string(),
            },
        );
        self.push(
            op,
            OpKind::Call {
                callee: sig.name.to_string(),
                args: args.to_vec(),
                result: Some(result),
            },
        );
        result
    }

    pub fn call_void(&mut self, sig: &'static CallSignature, args: &[ValueId]) {
        debug_assert!(!sig.returns_value(), "{} returns a value", sig.name);
        debug_assert_eq!(args.len(), sig.params.len(), "arity of {}", sig.name);
        self.edits.runtime_calls.push(sig);
        let op = self.module.fresh_op_id();
        self.push(
            op,
            OpKind::Call {
                callee: sig.name.to_string(),
                args: args.to_vec(),
                result: None,
            },
        );
    }

    // ─── Constants ────────────────────────────────────────────────

    pub fn int_const(&mut self, ty: Type, value: i64) -> ValueId {
        let (op, result) = self.new_result(ty);
        self.push(
            op,
            OpKind::Constant {
                result,
                value: Literal::Int(value),
            },
        );
        result
    }

    pub fn index_const(&mut self, value: u64) -> ValueId {
        let ty = self.index_type();
        self.int_const(ty, value as i64)
    }

    pub fn i32_const(&mut self, value: i32) -> ValueId {
        self.int_const(Type::Int(32), value as i64)
    }

    pub fn materialize(&mut self, v: IndexValue) -> ValueId {
        match v {
            IndexValue::Const(n) => self.index_const(n),
            IndexValue::Value(v) => v,
        }
    }

    /// A static index, if it fits the configured index width.
    pub fn checked_index(&self, n: u64) -> Result<IndexValue, MatchFailure> {
        if n <= self.converter.max_index() {
            Ok(IndexValue::Const(n))
        } else {
            Err(MatchFailure::decline(SIZE_OVERFLOW))
        }
    }

    /// Index product, folded when both sides are known or one side is 1.
    /// A folded product must fit the index width.
    pub fn mul_index(
        &mut self,
        lhs: IndexValue,
        rhs: IndexValue,
    ) -> Result<IndexValue, MatchFailure> {
        match (lhs, rhs) {
            (IndexValue::Const(a), IndexValue::Const(b)) => match a.checked_mul(b) {
                Some(n) => self.checked_index(n),
                None => Err(MatchFailure::decline(SIZE_OVERFLOW)),
            },
            (IndexValue::Const(1), other) | (other, IndexValue::Const(1)) => Ok(other),
            _ => {
                let lhs = self.materialize(lhs);
                let rhs = self.materialize(rhs);
                Ok(IndexValue::Value(self.mul(lhs, rhs)))
            }
        }
    }

    /// Byte size of `count` elements of the lowered type `elem`, checked
    /// against the index width.
    pub fn static_byte_size(&self, elem: &Type, count: u64) -> Result<u64, MatchFailure> {
        count
            .checked_mul(self.converter.store_size(elem))
            .filter(|&bytes| bytes <= self.converter.max_index())
            .ok_or_else(|| MatchFailure::decline(SIZE_OVERFLOW))
    }

    // ─── Aggregates and pointers ──────────────────────────────────

    pub fn undef(&mut self, ty: Type) -> ValueId {
        let (op, result) = self.new_result(ty);
        self.push(op, OpKind::Undef { result });
        result
    }

    pub fn insert_value(&mut self, aggregate: ValueId, value: ValueId, position: &[u32]) -> ValueId {
        let ty = self.ty(aggregate).clone();
        let (op, result) = self.new_result(ty);
        self.push(
            op,
            OpKind::InsertValue {
                result,
                aggregate,
                value,
                position: position.to_vec(),
            },
        );
        result
    }

    pub fn extract_value(&mut self, aggregate: ValueId, position: &[u32]) -> ValueId {
        let ty = member_type(self.ty(aggregate), position).unwrap_or(Type::Void);
        let (op, result) = self.new_result(ty);
        self.push(
            op,
            OpKind::ExtractValue {
                result,
                aggregate,
                position: position.to_vec(),
            },
        );
        result
    }

    pub fn null(&mut self, ty: Type) -> ValueId {
        let (op, result) = self.new_result(ty);
        self.push(op, OpKind::Null { result });
        result
    }

    pub fn gep(&mut self, base: ValueId, indices: Vec<GepIndex>, ty: Type) -> ValueId {
        let (op, result) = self.new_result(ty);
        self.push(
            op,
            OpKind::Gep {
                result,
                base,
                indices,
            },
        );
        result
    }

    pub fn bitcast(&mut self, value: ValueId, ty: Type) -> ValueId {
        let (op, result) = self.new_result(ty);
        self.push(op, OpKind::Bitcast { result, value });
        result
    }

    pub fn ptr_to_int(&mut self, value: ValueId) -> ValueId {
        let ty = self.index_type();
        let (op, result) = self.new_result(ty);
        self.push(op, OpKind::PtrToInt { result, value });
        result
    }

    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.index_type();
        let (op, result) = self.new_result(ty);
        self.push(op, OpKind::Mul { result, lhs, rhs });
        result
    }

    /// Stack slot for `count` elements of `elem`.
    pub fn alloca(&mut self, count: ValueId, elem: Type) -> ValueId {
        let (op, result) = self.new_result(Type::ptr(elem));
        self.push(op, OpKind::Alloca { result, count });
        result
    }

    pub fn store(&mut self, value: ValueId, addr: ValueId) {
        let op = self.module.fresh_op_id();
        self.push(op, OpKind::Store { value, addr });
    }

    /// Size in bytes of `elem_ptr`'s pointee times `count`, computed as the
    /// address of element `count` from a null base.
    pub fn size_in_bytes(&mut self, elem_ptr: Type, count: IndexValue) -> ValueId {
        let count = self.materialize(count);
        let null = self.null(elem_ptr.clone());
        let end = self.gep(null, vec![GepIndex::Value(count)], elem_ptr);
        self.ptr_to_int(end)
    }

    // ─── Globals ──────────────────────────────────────────────────

    /// Declare an internal constant string. A global of the same name is
    /// reused.
    pub fn global_string(&mut self, name: &str, bytes: &[u8]) -> Type {
        let existing = self
            .module
            .global(name)
            .or_else(|| self.edits.globals.iter().find(|g| g.name == name));
        if let Some(g) = existing {
            debug_assert_eq!(g.bytes, bytes, "global @{} redefined", name);
            return g.ty();
        }
        let global = Global {
            name: name.to_string(),
            bytes: bytes.to_vec(),
        };
        let ty = global.ty();
        self.edits.globals.push(global);
        ty
    }

    /// `i8*` to the first byte of the string global `name`.
    pub fn string_ptr(&mut self, name: &str, bytes: &[u8]) -> ValueId {
        let ty = self.global_string(name, bytes);
        let (op, addr) = self.new_result(Type::ptr(ty));
        self.push(
            op,
            OpKind::AddressOf {
                result: addr,
                global: name.to_string(),
            },
        );
        self.gep(
            addr,
            vec![GepIndex::Const(0), GepIndex::Const(0)],
            Type::i8_ptr(),
        )
    }
}

/// Type of the member at `position` inside an aggregate type.
pub fn member_type(ty: &Type, position: &[u32]) -> Option<Type> {
    let mut ty = ty;
    for &i in position {
        ty = match ty {
            Type::Struct(fields) => fields.get(i as usize)?,
            Type::Array(n, elem) if (i as u64) < *n => elem,
            _ => return None,
        };
    }
    Some(ty.clone())
}
