//! Textual form of a [`Module`].
//!
//! GPU dialect and structural operations print in the syntax the parser
//! reads; lowered operations print in an LLVM-dialect-like syntax.

use std::fmt::{self, Write};

use super::{Attr, Block, FuncDecl, GepIndex, Global, Literal, Module, OpKind, Operation, ValueId};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        Printer { module: self, out: &mut out }.module()?;
        f.write_str(&out)
    }
}

/// Escape a byte string for a quoted literal. Printable ASCII stays as is,
/// everything else becomes `\XX`.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' => s.push_str("\\22"),
            b'\\' => s.push_str("\\5C"),
            0x20..=0x7e => s.push(b as char),
            _ => {
                let _ = write!(s, "\\{:02X}", b);
            }
        }
    }
    s
}

struct Printer<'a> {
    module: &'a Module,
    out: &'a mut String,
}

impl Printer<'_> {
    fn module(&mut self) -> fmt::Result {
        let m = self.module;
        for gm in &m.gpu_modules {
            write!(self.out, "gpu.module @{}", gm.name)?;
            if !gm.attrs.is_empty() {
                let attrs: Vec<String> = gm
                    .attrs
                    .iter()
                    .map(|(k, v)| match v {
                        Attr::Str(bytes) => format!("{} = \"{}\"", k, escape_bytes(bytes)),
                        Attr::Int(n) => format!("{} = {}", k, n),
                    })
                    .collect();
                write!(self.out, " attributes {{{}}}", attrs.join(", "))?;
            }
            self.out.push('\n');
        }
        for g in &m.globals {
            self.global(g)?;
        }
        for d in &m.decls {
            self.decl(d)?;
        }
        for (i, func) in m.funcs.iter().enumerate() {
            if i > 0 || !self.out.is_empty() {
                self.out.push('\n');
            }
            let args: Vec<String> = func
                .args
                .iter()
                .map(|&a| format!("{}: {}", name(m, a), m.ty(a)))
                .collect();
            writeln!(self.out, "func @{}({}) {{", func.name, args.join(", "))?;
            self.block(&func.body, 1)?;
            self.out.push_str("}\n");
        }
        Ok(())
    }

    fn global(&mut self, g: &Global) -> fmt::Result {
        writeln!(
            self.out,
            "llvm.mlir.global internal constant @{}(\"{}\") : {}",
            g.name,
            escape_bytes(&g.bytes),
            g.ty()
        )
    }

    fn decl(&mut self, d: &FuncDecl) -> fmt::Result {
        let params: Vec<String> = d.params.iter().map(|t| t.to_string()).collect();
        writeln!(
            self.out,
            "llvm.func @{}({}) -> {}",
            d.name,
            params.join(", "),
            d.ret
        )
    }

    fn block(&mut self, block: &Block, depth: usize) -> fmt::Result {
        for op in &block.ops {
            if op.erased {
                continue;
            }
            self.op(op, depth)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &Operation, depth: usize) -> fmt::Result {
        let m = self.module;
        let indent = "  ".repeat(depth);
        self.out.push_str(&indent);
        let results = op.kind.results();
        if !results.is_empty() {
            write!(self.out, "{} = ", names(m, &results))?;
        }
        let op_name = op.kind.name();
        match &op.kind {
            OpKind::Alloc {
                memref,
                token,
                deps,
                dynamic_sizes,
            } => {
                write!(self.out, "{}{}", op_name, async_clause(m, *token, deps))?;
                if !dynamic_sizes.is_empty() {
                    write!(self.out, " ({})", names(m, dynamic_sizes))?;
                }
                write!(self.out, " : {}", m.ty(*memref))?;
            }
            OpKind::Dealloc {
                memref,
                token,
                deps,
            } => {
                write!(
                    self.out,
                    "{}{} {}",
                    op_name,
                    async_clause(m, *token, deps),
                    name(m, *memref)
                )?;
            }
            OpKind::HostRegister { value } => write!(self.out, "{} {}", op_name, name(m, *value))?,
            OpKind::Memcpy {
                dst,
                src,
                token,
                deps,
            } => {
                write!(
                    self.out,
                    "{}{} {}, {}",
                    op_name,
                    async_clause(m, *token, deps),
                    name(m, *dst),
                    name(m, *src)
                )?;
            }
            OpKind::Memset {
                dst,
                value,
                token,
                deps,
            } => {
                write!(
                    self.out,
                    "{}{} {}, {}",
                    op_name,
                    async_clause(m, *token, deps),
                    name(m, *dst),
                    name(m, *value)
                )?;
            }
            OpKind::SetDefaultDevice { index } => {
                write!(self.out, "{} {}", op_name, name(m, *index))?
            }
            OpKind::Wait { token, deps } => {
                write!(self.out, "{}{}", op_name, async_clause(m, *token, deps))?
            }
            OpKind::LaunchFunc(launch) => {
                write!(
                    self.out,
                    "{}{} @{}::@{} blocks in ({}) threads in ({})",
                    op_name,
                    async_clause(m, launch.token, &launch.deps),
                    launch.kernel_module,
                    launch.kernel_name,
                    names(m, &launch.grid),
                    names(m, &launch.block)
                )?;
                if let Some(shm) = launch.dynamic_shared_memory {
                    write!(self.out, " dynamic_shared_memory_size {}", name(m, shm))?;
                }
                if !launch.args.is_empty() {
                    write!(self.out, " args({})", names(m, &launch.args))?;
                }
            }
            OpKind::Constant { result, value } => {
                let ty = m.ty(*result);
                match value {
                    Literal::Int(n) => write!(self.out, "{} {} : {}", op_name, n, ty)?,
                    Literal::Float(x) => write!(self.out, "{} {:?} : {}", op_name, x, ty)?,
                }
            }
            OpKind::Execute { body, .. } => {
                writeln!(self.out, "{} {{", op_name)?;
                self.block(body, depth + 1)?;
                self.out.push_str(&indent);
                self.out.push('}');
            }
            OpKind::Yield { operands } | OpKind::Return { operands } => {
                self.out.push_str(op_name);
                if !operands.is_empty() {
                    write!(self.out, " {}", names(m, operands))?;
                }
            }
            OpKind::Await { operand, .. } => write!(self.out, "{} {}", op_name, name(m, *operand))?,
            OpKind::Call {
                callee,
                args,
                result,
            } => {
                write!(self.out, "{} @{}({})", op_name, callee, names(m, args))?;
                if let Some(r) = result {
                    write!(self.out, " : {}", m.ty(*r))?;
                }
            }
            OpKind::Undef { result } | OpKind::Null { result } => {
                write!(self.out, "{} : {}", op_name, m.ty(*result))?
            }
            OpKind::InsertValue {
                result,
                aggregate,
                value,
                position,
            } => write!(
                self.out,
                "{} {}, {}{} : {}",
                op_name,
                name(m, *value),
                name(m, *aggregate),
                position_list(position),
                m.ty(*result)
            )?,
            OpKind::ExtractValue {
                result,
                aggregate,
                position,
            } => write!(
                self.out,
                "{} {}{} : {}",
                op_name,
                name(m, *aggregate),
                position_list(position),
                m.ty(*result)
            )?,
            OpKind::AddressOf { result, global } => write!(
                self.out,
                "{} @{} : {}",
                op_name,
                global,
                m.ty(*result)
            )?,
            OpKind::Gep {
                result,
                base,
                indices,
            } => {
                let indices: Vec<String> = indices
                    .iter()
                    .map(|i| match i {
                        GepIndex::Const(n) => n.to_string(),
                        GepIndex::Value(v) => name(m, *v),
                    })
                    .collect();
                write!(
                    self.out,
                    "{} {}[{}] : {}",
                    op_name,
                    name(m, *base),
                    indices.join(", "),
                    m.ty(*result)
                )?;
            }
            OpKind::Bitcast { result, value } | OpKind::PtrToInt { result, value } => write!(
                self.out,
                "{} {} : {} to {}",
                op_name,
                name(m, *value),
                m.ty(*value),
                m.ty(*result)
            )?,
            OpKind::Mul { result, lhs, rhs } => write!(
                self.out,
                "{} {}, {} : {}",
                op_name,
                name(m, *lhs),
                name(m, *rhs),
                m.ty(*result)
            )?,
            OpKind::Alloca { result, count } => {
                let ty = m.ty(*result);
                let elem = ty.pointee().map_or(String::new(), |t| t.to_string());
                write!(
                    self.out,
                    "{} {} x {} : {}",
                    op_name,
                    name(m, *count),
                    elem,
                    ty
                )?;
            }
            OpKind::Store { value, addr } => write!(
                self.out,
                "{} {}, {}",
                op_name,
                name(m, *value),
                name(m, *addr)
            )?,
        }
        self.out.push('\n');
        Ok(())
    }
}

fn name(m: &Module, v: ValueId) -> String {
    match &m.value(v).name {
        Some(name) => format!("%{}", name),
        None => v.to_string(),
    }
}

fn names(m: &Module, vs: &[ValueId]) -> String {
    vs.iter().map(|&v| name(m, v)).collect::<Vec<_>>().join(", ")
}

/// ` async [%d]` clause shared by the GPU dialect operations.
fn async_clause(m: &Module, token: Option<ValueId>, deps: &[ValueId]) -> String {
    let mut s = String::new();
    if token.is_some() {
        s.push_str(" async");
    }
    if !deps.is_empty() {
        let _ = write!(s, " [{}]", names(m, deps));
    }
    s
}

fn position_list(position: &[u32]) -> String {
    let parts: Vec<String> = position.iter().map(|p| p.to_string()).collect();
    format!("[{}]", parts.join(", "))
}
