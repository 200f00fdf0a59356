//! Program representation shared by the GPU dialect input and the lowered
//! runtime-call output.
//!
//! Values live in one arena on the [`Module`]; operations refer to them by
//! [`ValueId`]. Each operation is one variant of the closed [`OpKind`] enum.
//! Only `async.execute` carries a nested [`Block`]; everything else is flat.
//!
//! The lowering never removes an operation while it is running: replaced
//! operations are marked `erased` and stay in place as anchors until the
//! conversion finishes (see `Block::purge_erased`).

pub mod print;
pub mod types;

use std::fmt;

use crate::span::Span;

pub use types::{Dim, Layout, MemRefType, Type};

// ─── Identifiers ──────────────────────────────────────────────────

/// An SSA value in the module's value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A stable operation identity, unique within one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

// ─── Values ───────────────────────────────────────────────────────

/// Where a value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDef {
    /// Function argument.
    Arg,
    /// Result `index` of operation `op`.
    Result { op: OpId, index: u32 },
    /// Result of a runtime call. The callee is kept so that lowering rules
    /// can recover what kind of handle a value is.
    Call { op: OpId, callee: String },
}

impl ValueDef {
    pub fn op(&self) -> Option<OpId> {
        match self {
            ValueDef::Arg => None,
            ValueDef::Result { op, .. } | ValueDef::Call { op, .. } => Some(*op),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub ty: Type,
    pub def: ValueDef,
    /// Source-level name (`%buf`), if the value came from the parser.
    pub name: Option<String>,
}

/// A constant literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
}

/// One index of a `getelementptr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GepIndex {
    Const(i64),
    Value(ValueId),
}

// ─── Operations ───────────────────────────────────────────────────

/// Operands of `gpu.launch_func`.
#[derive(Debug, Clone)]
pub struct LaunchFunc {
    pub kernel_module: String,
    pub kernel_name: String,
    pub grid: [ValueId; 3],
    pub block: [ValueId; 3],
    pub dynamic_shared_memory: Option<ValueId>,
    /// Kernel arguments, excluding the launch configuration.
    pub args: Vec<ValueId>,
    pub deps: Vec<ValueId>,
    pub token: Option<ValueId>,
}

/// Every operation kind the lowering reads or writes.
///
/// GPU dialect operations are illegal after lowering and each has a rule.
/// Structural operations survive once their types are converted. Runtime
/// plumbing is what the rules emit.
#[derive(Debug, Clone)]
pub enum OpKind {
    // ═══════════════════════════════════════════════════════════════
    // GPU dialect
    // ═══════════════════════════════════════════════════════════════
    /// `%m, %t = gpu.alloc async [%d] (%n) : memref<?xf32>`
    Alloc {
        memref: ValueId,
        token: Option<ValueId>,
        deps: Vec<ValueId>,
        dynamic_sizes: Vec<ValueId>,
    },
    /// `%t = gpu.dealloc async [%d] %m`
    Dealloc {
        memref: ValueId,
        token: Option<ValueId>,
        deps: Vec<ValueId>,
    },
    /// `gpu.host_register %m`
    HostRegister { value: ValueId },
    /// `%t = gpu.memcpy async [%d] %dst, %src`
    Memcpy {
        dst: ValueId,
        src: ValueId,
        token: Option<ValueId>,
        deps: Vec<ValueId>,
    },
    /// `%t = gpu.memset async [%d] %dst, %value`
    Memset {
        dst: ValueId,
        value: ValueId,
        token: Option<ValueId>,
        deps: Vec<ValueId>,
    },
    /// `gpu.set_default_device %i`
    SetDefaultDevice { index: ValueId },
    /// `gpu.wait [%a, %b]` or `%t = gpu.wait async [%a, %b]`
    Wait {
        token: Option<ValueId>,
        deps: Vec<ValueId>,
    },
    /// `gpu.launch_func ...`
    LaunchFunc(LaunchFunc),

    // ═══════════════════════════════════════════════════════════════
    // Structural
    // ═══════════════════════════════════════════════════════════════
    /// `%c = constant 4 : index`
    Constant { result: ValueId, value: Literal },
    /// `%tok, %v = async.execute { ... }`. `results[0]` is the region's
    /// completion token, the rest are the yielded values.
    Execute { results: Vec<ValueId>, body: Block },
    /// `async.yield %a, %b`
    Yield { operands: Vec<ValueId> },
    /// `%r = async.await %v`
    Await { operand: ValueId, result: ValueId },
    /// `return %a`
    Return { operands: Vec<ValueId> },

    // ═══════════════════════════════════════════════════════════════
    // Runtime plumbing
    // ═══════════════════════════════════════════════════════════════
    Call {
        callee: String,
        args: Vec<ValueId>,
        result: Option<ValueId>,
    },
    Undef { result: ValueId },
    InsertValue {
        result: ValueId,
        aggregate: ValueId,
        value: ValueId,
        position: Vec<u32>,
    },
    ExtractValue {
        result: ValueId,
        aggregate: ValueId,
        position: Vec<u32>,
    },
    Null { result: ValueId },
    AddressOf { result: ValueId, global: String },
    Gep {
        result: ValueId,
        base: ValueId,
        indices: Vec<GepIndex>,
    },
    Bitcast { result: ValueId, value: ValueId },
    PtrToInt { result: ValueId, value: ValueId },
    Mul {
        result: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Stack allocation of `count` elements of the result's pointee type.
    Alloca { result: ValueId, count: ValueId },
    Store { value: ValueId, addr: ValueId },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Alloc { .. } => "gpu.alloc",
            OpKind::Dealloc { .. } => "gpu.dealloc",
            OpKind::HostRegister { .. } => "gpu.host_register",
            OpKind::Memcpy { .. } => "gpu.memcpy",
            OpKind::Memset { .. } => "gpu.memset",
            OpKind::SetDefaultDevice { .. } => "gpu.set_default_device",
            OpKind::Wait { .. } => "gpu.wait",
            OpKind::LaunchFunc(_) => "gpu.launch_func",
            OpKind::Constant { .. } => "constant",
            OpKind::Execute { .. } => "async.execute",
            OpKind::Yield { .. } => "async.yield",
            OpKind::Await { .. } => "async.await",
            OpKind::Return { .. } => "return",
            OpKind::Call { .. } => "llvm.call",
            OpKind::Undef { .. } => "llvm.mlir.undef",
            OpKind::InsertValue { .. } => "llvm.insertvalue",
            OpKind::ExtractValue { .. } => "llvm.extractvalue",
            OpKind::Null { .. } => "llvm.mlir.null",
            OpKind::AddressOf { .. } => "llvm.mlir.addressof",
            OpKind::Gep { .. } => "llvm.getelementptr",
            OpKind::Bitcast { .. } => "llvm.bitcast",
            OpKind::PtrToInt { .. } => "llvm.ptrtoint",
            OpKind::Mul { .. } => "llvm.mul",
            OpKind::Alloca { .. } => "llvm.alloca",
            OpKind::Store { .. } => "llvm.store",
        }
    }

    /// GPU dialect operations never survive a successful lowering.
    pub fn is_gpu(&self) -> bool {
        matches!(
            self,
            OpKind::Alloc { .. }
                | OpKind::Dealloc { .. }
                | OpKind::HostRegister { .. }
                | OpKind::Memcpy { .. }
                | OpKind::Memset { .. }
                | OpKind::SetDefaultDevice { .. }
                | OpKind::Wait { .. }
                | OpKind::LaunchFunc(_)
        )
    }

    /// Async dependencies of a GPU dialect operation.
    pub fn async_deps(&self) -> &[ValueId] {
        match self {
            OpKind::Alloc { deps, .. }
            | OpKind::Dealloc { deps, .. }
            | OpKind::Memcpy { deps, .. }
            | OpKind::Memset { deps, .. }
            | OpKind::Wait { deps, .. } => deps,
            OpKind::LaunchFunc(launch) => &launch.deps,
            _ => &[],
        }
    }

    /// Async result token of a GPU dialect operation.
    pub fn async_token(&self) -> Option<ValueId> {
        match self {
            OpKind::Alloc { token, .. }
            | OpKind::Dealloc { token, .. }
            | OpKind::Memcpy { token, .. }
            | OpKind::Memset { token, .. }
            | OpKind::Wait { token, .. } => *token,
            OpKind::LaunchFunc(launch) => launch.token,
            _ => None,
        }
    }

    /// Operands in a fixed order. `operand_slots` visits the same order.
    pub fn operands(&self) -> Vec<ValueId> {
        let mut out = Vec::new();
        match self {
            OpKind::Alloc {
                deps,
                dynamic_sizes,
                ..
            } => {
                out.extend(deps);
                out.extend(dynamic_sizes);
            }
            OpKind::Dealloc { memref, deps, .. } => {
                out.extend(deps);
                out.push(*memref);
            }
            OpKind::HostRegister { value } => out.push(*value),
            OpKind::Memcpy { dst, src, deps, .. } => {
                out.extend(deps);
                out.push(*dst);
                out.push(*src);
            }
            OpKind::Memset {
                dst, value, deps, ..
            } => {
                out.extend(deps);
                out.push(*dst);
                out.push(*value);
            }
            OpKind::SetDefaultDevice { index } => out.push(*index),
            OpKind::Wait { deps, .. } => out.extend(deps),
            OpKind::LaunchFunc(launch) => {
                out.extend(&launch.deps);
                out.extend(launch.grid);
                out.extend(launch.block);
                out.extend(launch.dynamic_shared_memory);
                out.extend(&launch.args);
            }
            OpKind::Constant { .. }
            | OpKind::Execute { .. }
            | OpKind::Undef { .. }
            | OpKind::Null { .. }
            | OpKind::AddressOf { .. } => {}
            OpKind::Yield { operands } | OpKind::Return { operands } => out.extend(operands),
            OpKind::Await { operand, .. } => out.push(*operand),
            OpKind::Call { args, .. } => out.extend(args),
            OpKind::InsertValue {
                aggregate, value, ..
            } => {
                out.push(*aggregate);
                out.push(*value);
            }
            OpKind::ExtractValue { aggregate, .. } => out.push(*aggregate),
            OpKind::Gep { base, indices, .. } => {
                out.push(*base);
                out.extend(indices.iter().filter_map(|i| match i {
                    GepIndex::Value(v) => Some(*v),
                    GepIndex::Const(_) => None,
                }));
            }
            OpKind::Bitcast { value, .. } | OpKind::PtrToInt { value, .. } => out.push(*value),
            OpKind::Mul { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            OpKind::Alloca { count, .. } => out.push(*count),
            OpKind::Store { value, addr } => {
                out.push(*value);
                out.push(*addr);
            }
        }
        out
    }

    /// Mutable access to the operands, in the order of `operands`.
    pub fn operand_slots(&mut self) -> Vec<&mut ValueId> {
        let mut out: Vec<&mut ValueId> = Vec::new();
        match self {
            OpKind::Alloc {
                deps,
                dynamic_sizes,
                ..
            } => {
                out.extend(deps.iter_mut());
                out.extend(dynamic_sizes.iter_mut());
            }
            OpKind::Dealloc { memref, deps, .. } => {
                out.extend(deps.iter_mut());
                out.push(memref);
            }
            OpKind::HostRegister { value } => out.push(value),
            OpKind::Memcpy { dst, src, deps, .. } => {
                out.extend(deps.iter_mut());
                out.push(dst);
                out.push(src);
            }
            OpKind::Memset {
                dst, value, deps, ..
            } => {
                out.extend(deps.iter_mut());
                out.push(dst);
                out.push(value);
            }
            OpKind::SetDefaultDevice { index } => out.push(index),
            OpKind::Wait { deps, .. } => out.extend(deps.iter_mut()),
            OpKind::LaunchFunc(launch) => {
                out.extend(launch.deps.iter_mut());
                out.extend(launch.grid.iter_mut());
                out.extend(launch.block.iter_mut());
                out.extend(launch.dynamic_shared_memory.iter_mut());
                out.extend(launch.args.iter_mut());
            }
            OpKind::Constant { .. }
            | OpKind::Execute { .. }
            | OpKind::Undef { .. }
            | OpKind::Null { .. }
            | OpKind::AddressOf { .. } => {}
            OpKind::Yield { operands } | OpKind::Return { operands } => {
                out.extend(operands.iter_mut())
            }
            OpKind::Await { operand, .. } => out.push(operand),
            OpKind::Call { args, .. } => out.extend(args.iter_mut()),
            OpKind::InsertValue {
                aggregate, value, ..
            } => {
                out.push(aggregate);
                out.push(value);
            }
            OpKind::ExtractValue { aggregate, .. } => out.push(aggregate),
            OpKind::Gep { base, indices, .. } => {
                out.push(base);
                out.extend(indices.iter_mut().filter_map(|i| match i {
                    GepIndex::Value(v) => Some(v),
                    GepIndex::Const(_) => None,
                }));
            }
            OpKind::Bitcast { value, .. } | OpKind::PtrToInt { value, .. } => out.push(value),
            OpKind::Mul { lhs, rhs, .. } => {
                out.push(lhs);
                out.push(rhs);
            }
            OpKind::Alloca { count, .. } => out.push(count),
            OpKind::Store { value, addr } => {
                out.push(value);
                out.push(addr);
            }
        }
        out
    }

    /// Results in a fixed order. `result_slots` visits the same order.
    pub fn results(&self) -> Vec<ValueId> {
        let mut out = Vec::new();
        match self {
            OpKind::Alloc { memref, token, .. } => {
                out.push(*memref);
                out.extend(token);
            }
            OpKind::Dealloc { token, .. }
            | OpKind::Memcpy { token, .. }
            | OpKind::Memset { token, .. }
            | OpKind::Wait { token, .. } => out.extend(token),
            OpKind::LaunchFunc(launch) => out.extend(launch.token),
            OpKind::HostRegister { .. }
            | OpKind::SetDefaultDevice { .. }
            | OpKind::Yield { .. }
            | OpKind::Return { .. }
            | OpKind::Store { .. } => {}
            OpKind::Execute { results, .. } => out.extend(results),
            OpKind::Call { result, .. } => out.extend(result),
            OpKind::Constant { result, .. }
            | OpKind::Await { result, .. }
            | OpKind::Undef { result }
            | OpKind::InsertValue { result, .. }
            | OpKind::ExtractValue { result, .. }
            | OpKind::Null { result }
            | OpKind::AddressOf { result, .. }
            | OpKind::Gep { result, .. }
            | OpKind::Bitcast { result, .. }
            | OpKind::PtrToInt { result, .. }
            | OpKind::Mul { result, .. }
            | OpKind::Alloca { result, .. } => out.push(*result),
        }
        out
    }

    /// Mutable access to the results, in the order of `results`.
    pub fn result_slots(&mut self) -> Vec<&mut ValueId> {
        let mut out: Vec<&mut ValueId> = Vec::new();
        match self {
            OpKind::Alloc { memref, token, .. } => {
                out.push(memref);
                out.extend(token.iter_mut());
            }
            OpKind::Dealloc { token, .. }
            | OpKind::Memcpy { token, .. }
            | OpKind::Memset { token, .. }
            | OpKind::Wait { token, .. } => out.extend(token.iter_mut()),
            OpKind::LaunchFunc(launch) => out.extend(launch.token.iter_mut()),
            OpKind::HostRegister { .. }
            | OpKind::SetDefaultDevice { .. }
            | OpKind::Yield { .. }
            | OpKind::Return { .. }
            | OpKind::Store { .. } => {}
            OpKind::Execute { results, .. } => out.extend(results.iter_mut()),
            OpKind::Call { result, .. } => out.extend(result.iter_mut()),
            OpKind::Constant { result, .. }
            | OpKind::Await { result, .. }
            | OpKind::Undef { result }
            | OpKind::InsertValue { result, .. }
            | OpKind::ExtractValue { result, .. }
            | OpKind::Null { result }
            | OpKind::AddressOf { result, .. }
            | OpKind::Gep { result, .. }
            | OpKind::Bitcast { result, .. }
            | OpKind::PtrToInt { result, .. }
            | OpKind::Mul { result, .. }
            | OpKind::Alloca { result, .. } => out.push(result),
        }
        out
    }

    pub fn body(&self) -> Option<&Block> {
        match self {
            OpKind::Execute { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Block> {
        match self {
            OpKind::Execute { body, .. } => Some(body),
            _ => None,
        }
    }

    /// A copy without the nested region, for rules that only look at the
    /// operation itself.
    pub fn header(&self) -> OpKind {
        match self {
            OpKind::Execute { results, .. } => OpKind::Execute {
                results: results.clone(),
                body: Block::default(),
            },
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OpId,
    pub kind: OpKind,
    pub span: Span,
    /// Replaced during lowering; kept as a position anchor until purged.
    pub erased: bool,
}

impl Operation {
    pub fn new(id: OpId, kind: OpKind, span: Span) -> Self {
        Self {
            id,
            kind,
            span,
            erased: false,
        }
    }
}

// ─── Blocks ───────────────────────────────────────────────────────

/// A straight-line list of operations.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub ops: Vec<Operation>,
}

impl Block {
    /// Find an operation by id, looking into nested regions.
    pub fn find(&self, id: OpId) -> Option<&Operation> {
        for op in &self.ops {
            if op.id == id {
                return Some(op);
            }
            if let Some(found) = op.kind.body().and_then(|b| b.find(id)) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_mut(&mut self, id: OpId) -> Option<&mut Operation> {
        for op in &mut self.ops {
            if op.id == id {
                return Some(op);
            }
            if let Some(found) = op.kind.body_mut().and_then(|b| b.find_mut(id)) {
                return Some(found);
            }
        }
        None
    }

    /// Splice `ops` next to the operation `anchor`, wherever it is nested.
    /// Returns false (leaving `ops` untouched) if `anchor` is not here.
    pub fn insert_next_to(&mut self, anchor: OpId, ops: &mut Vec<Operation>, after: bool) -> bool {
        if let Some(pos) = self.ops.iter().position(|op| op.id == anchor) {
            let at = if after { pos + 1 } else { pos };
            self.ops.splice(at..at, ops.drain(..));
            return true;
        }
        self.ops.iter_mut().any(|op| {
            op.kind
                .body_mut()
                .is_some_and(|b| b.insert_next_to(anchor, ops, after))
        })
    }

    /// Visit every live operation in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Operation)) {
        for op in &self.ops {
            if op.erased {
                continue;
            }
            f(op);
            if let Some(body) = op.kind.body() {
                body.walk(f);
            }
        }
    }

    /// Mutable pre-order visit of every live operation.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Operation)) {
        for op in &mut self.ops {
            if op.erased {
                continue;
            }
            f(op);
            if let Some(body) = op.kind.body_mut() {
                body.walk_mut(f);
            }
        }
    }

    /// Drop operations marked erased.
    pub fn purge_erased(&mut self) {
        self.ops.retain(|op| !op.erased);
        for op in &mut self.ops {
            if let Some(body) = op.kind.body_mut() {
                body.purge_erased();
            }
        }
    }
}

// ─── Top-level items ──────────────────────────────────────────────

/// Attribute value on a `gpu.module`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    Str(Vec<u8>),
    Int(i64),
}

/// A compiled kernel module: `gpu.module @kernels attributes {...}`.
#[derive(Debug, Clone)]
pub struct GpuModule {
    pub name: String,
    pub attrs: Vec<(String, Attr)>,
    pub span: Span,
}

impl GpuModule {
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// An internal constant byte string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Global {
    pub fn ty(&self) -> Type {
        Type::Array(self.bytes.len() as u64, Box::new(Type::Int(8)))
    }
}

/// An external function declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncDecl {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Type>,
}

#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub args: Vec<ValueId>,
    pub body: Block,
    pub span: Span,
}

// ─── Module ───────────────────────────────────────────────────────

/// One program unit: kernel modules, host functions, and after lowering
/// the globals and runtime declarations they reference.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub values: Vec<ValueInfo>,
    next_op: u32,
    pub gpu_modules: Vec<GpuModule>,
    pub globals: Vec<Global>,
    pub decls: Vec<FuncDecl>,
    pub funcs: Vec<Func>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_op_id(&mut self) -> OpId {
        let id = OpId(self.next_op);
        self.next_op += 1;
        id
    }

    pub fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo { ty, def, name: None });
        id
    }

    pub fn new_named_value(&mut self, ty: Type, def: ValueDef, name: &str) -> ValueId {
        let id = self.new_value(ty, def);
        self.values[id.0 as usize].name = Some(name.to_string());
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0 as usize]
    }

    pub fn ty(&self, id: ValueId) -> &Type {
        &self.value(id).ty
    }

    /// Callee of the runtime call that produced `id`, if any.
    pub fn defining_callee(&self, id: ValueId) -> Option<&str> {
        match &self.value(id).def {
            ValueDef::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    pub fn gpu_module(&self, name: &str) -> Option<&GpuModule> {
        self.gpu_modules.iter().find(|m| m.name == name)
    }

    pub fn func(&self, name: &str) -> Option<&Func> {
        self.funcs.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn decl(&self, name: &str) -> Option<&FuncDecl> {
        self.decls.iter().find(|d| d.name == name)
    }

    pub fn find_op(&self, id: OpId) -> Option<&Operation> {
        self.funcs.iter().find_map(|f| f.body.find(id))
    }

    pub fn find_op_mut(&mut self, id: OpId) -> Option<&mut Operation> {
        self.funcs.iter_mut().find_map(|f| f.body.find_mut(id))
    }

    /// Visit every live operation of every function in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Operation)) {
        for func in &self.funcs {
            func.body.walk(f);
        }
    }

    /// Runtime calls made by `func`, in emission order.
    pub fn call_trace(&self, func: &str) -> Vec<String> {
        let mut calls = Vec::new();
        if let Some(func) = self.func(func) {
            func.body.walk(&mut |op| {
                if let OpKind::Call { callee, .. } = &op.kind {
                    calls.push(callee.clone());
                }
            });
        }
        calls
    }
}
