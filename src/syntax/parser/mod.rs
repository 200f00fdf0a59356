use std::collections::HashMap;

use crate::diagnostic::Diagnostic;
use crate::ir::{
    Attr, Block, Dim, Func, GpuModule, Layout, LaunchFunc, Literal, MemRefType, Module, OpId,
    OpKind, Operation, Type, ValueDef, ValueId,
};
use crate::span::{Span, Spanned};
use crate::syntax::lexeme::Lexeme;

pub(crate) struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    module: Module,
    /// Value names visible at the current point of the current function.
    scope: HashMap<String, ValueId>,
    /// Nesting depth of `async.execute` regions.
    region_depth: u32,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            module: Module::new(),
            scope: HashMap::new(),
            region_depth: 0,
        }
    }

    pub(crate) fn parse_module(mut self) -> Result<Module, Vec<Diagnostic>> {
        loop {
            match self.peek().clone() {
                Lexeme::Eof => break,
                Lexeme::Func => self.parse_func(),
                Lexeme::Ident(name) if name == "gpu.module" => self.parse_gpu_module(),
                _ => {
                    self.error_with_help(
                        &format!(
                            "expected 'func' or 'gpu.module', found {}",
                            self.peek().description()
                        ),
                        "top-level items are `gpu.module @name ...` and `func @name(...) { ... }`",
                    );
                    return Err(self.diagnostics);
                }
            }
        }

        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }
        Ok(self.module)
    }

    // ─── Top-level items ──────────────────────────────────────────

    /// `gpu.module @name [attributes {key = "str" | int, ...}]`
    fn parse_gpu_module(&mut self) {
        let start = self.current_span();
        self.advance();
        let name = self.expect_symbol();
        let mut attrs = Vec::new();
        if self.eat(&Lexeme::Attributes) {
            self.expect(&Lexeme::LBrace);
            while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
                let key = self.expect_ident();
                self.expect(&Lexeme::Eq);
                let value = match self.peek().clone() {
                    Lexeme::Str(bytes) => {
                        self.advance();
                        Attr::Str(bytes)
                    }
                    Lexeme::Integer(n) => {
                        self.advance();
                        Attr::Int(n)
                    }
                    other => {
                        self.error_at_current(&format!(
                            "expected string or integer attribute value, found {}",
                            other.description()
                        ));
                        self.advance();
                        continue;
                    }
                };
                if attrs.iter().any(|(k, _): &(String, Attr)| *k == key.node) {
                    self.error_at(key.span, &format!("duplicate attribute '{}'", key.node));
                }
                attrs.push((key.node, value));
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
            self.expect(&Lexeme::RBrace);
        }

        if self.module.gpu_module(&name.node).is_some() {
            self.error_at(
                name.span,
                &format!("redefinition of gpu.module '@{}'", name.node),
            );
        }
        self.module.gpu_modules.push(GpuModule {
            name: name.node,
            attrs,
            span: start.merge(self.prev_span()),
        });
    }

    /// `func @name(%a: type, ...) { ops }`
    fn parse_func(&mut self) {
        let start = self.current_span();
        self.advance();
        let name = self.expect_symbol();
        if self.module.func(&name.node).is_some() {
            self.error_at(name.span, &format!("redefinition of func '@{}'", name.node));
        }

        self.scope.clear();
        let mut args = Vec::new();
        self.expect(&Lexeme::LParen);
        while !self.at(&Lexeme::RParen) && !self.at(&Lexeme::Eof) {
            let arg = self.expect_value_name();
            self.expect(&Lexeme::Colon);
            let ty = self.parse_type();
            args.push(self.define(arg, ty, ValueDef::Arg));
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RParen);

        let body = self.parse_block();
        self.module.funcs.push(Func {
            name: name.node,
            args,
            body,
            span: start.merge(self.prev_span()),
        });
    }

    /// `{ op* }`. On the first malformed operation the rest of the block is
    /// skipped.
    fn parse_block(&mut self) -> Block {
        let mut block = Block::default();
        self.expect(&Lexeme::LBrace);
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            let errors = self.diagnostics.len();
            let op = self.parse_op();
            if self.diagnostics.len() > errors {
                self.skip_to_block_end();
                break;
            }
            if let Some(op) = op {
                block.ops.push(op);
            }
        }
        self.expect(&Lexeme::RBrace);
        block
    }

    fn skip_to_block_end(&mut self) {
        let mut depth = 0u32;
        loop {
            match self.peek() {
                Lexeme::Eof => return,
                Lexeme::LBrace => depth += 1,
                Lexeme::RBrace if depth == 0 => return,
                Lexeme::RBrace => depth -= 1,
                _ => {}
            }
            self.advance();
        }
    }

    // ─── Operations ───────────────────────────────────────────────

    fn parse_op(&mut self) -> Option<Operation> {
        let start = self.current_span();
        let mut results = Vec::new();
        if matches!(self.peek(), Lexeme::Value(_)) {
            loop {
                results.push(self.expect_value_name());
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
            self.expect(&Lexeme::Eq);
        }

        let Lexeme::Ident(name) = self.peek().clone() else {
            self.error_at_current(&format!(
                "expected operation name, found {}",
                self.peek().description()
            ));
            return None;
        };
        let name_span = self.current_span();
        self.advance();

        let id = self.module.fresh_op_id();
        let kind = match name.as_str() {
            "constant" => self.parse_constant(id, &results),
            "gpu.alloc" => self.parse_alloc(id, &results),
            "gpu.dealloc" => {
                let (is_async, deps) = self.parse_async_clause();
                let memref = self.use_value_where(is_memref, "a memref");
                let token = self.bind_token(id, &results, is_async, "gpu.dealloc");
                OpKind::Dealloc {
                    memref,
                    token,
                    deps,
                }
            }
            "gpu.host_register" => {
                let value = self.use_value_where(is_memref, "a memref");
                self.bind_results(id, &results, Vec::new(), "gpu.host_register");
                OpKind::HostRegister { value }
            }
            "gpu.memcpy" => {
                let (is_async, deps) = self.parse_async_clause();
                let dst = self.use_value_where(is_memref, "a memref");
                self.expect(&Lexeme::Comma);
                let src = self.use_value_where(is_memref, "a memref");
                let token = self.bind_token(id, &results, is_async, "gpu.memcpy");
                OpKind::Memcpy {
                    dst,
                    src,
                    token,
                    deps,
                }
            }
            "gpu.memset" => {
                let (is_async, deps) = self.parse_async_clause();
                let dst = self.use_value_where(is_memref, "a memref");
                self.expect(&Lexeme::Comma);
                let value = self.use_value_where(is_scalar, "an integer or float");
                let token = self.bind_token(id, &results, is_async, "gpu.memset");
                OpKind::Memset {
                    dst,
                    value,
                    token,
                    deps,
                }
            }
            "gpu.set_default_device" => {
                let index = self.use_value_where(|t| *t == Type::Int(32), "an i32");
                self.bind_results(id, &results, Vec::new(), "gpu.set_default_device");
                OpKind::SetDefaultDevice { index }
            }
            "gpu.wait" => {
                let (is_async, deps) = self.parse_async_clause();
                let token = self.bind_token(id, &results, is_async, "gpu.wait");
                OpKind::Wait { token, deps }
            }
            "gpu.launch_func" => self.parse_launch(id, &results),
            "async.execute" => self.parse_execute(id, &results, name_span),
            "async.yield" => {
                if self.region_depth == 0 {
                    self.error_at(name_span, "'async.yield' outside of 'async.execute'");
                }
                let operands = self.parse_trailing_values();
                self.bind_results(id, &results, Vec::new(), "async.yield");
                OpKind::Yield { operands }
            }
            "async.await" => {
                let span = self.current_span();
                let operand = self.use_value();
                let ty = match self.module.ty(operand) {
                    Type::AsyncValue(inner) => (**inner).clone(),
                    other => {
                        let msg = format!("'async.await' expects an !async.value, found {}", other);
                        self.error_at(span, &msg);
                        Type::Index
                    }
                };
                let vals = self.bind_results(id, &results, vec![ty], "async.await");
                OpKind::Await {
                    operand,
                    result: vals[0],
                }
            }
            "return" => {
                let operands = self.parse_trailing_values();
                self.bind_results(id, &results, Vec::new(), "return");
                OpKind::Return { operands }
            }
            other => {
                self.error_at(name_span, &format!("unknown operation '{}'", other));
                return None;
            }
        };

        Some(Operation::new(id, kind, start.merge(self.prev_span())))
    }

    /// `constant <literal> : <type>`
    fn parse_constant(&mut self, id: OpId, results: &[Spanned<String>]) -> OpKind {
        let lit_span = self.current_span();
        let literal = match self.peek().clone() {
            Lexeme::Integer(n) => Literal::Int(n),
            Lexeme::Float(x) => Literal::Float(x),
            _ => {
                self.error_at_current(&format!(
                    "expected numeric literal, found {}",
                    self.peek().description()
                ));
                Literal::Int(0)
            }
        };
        self.advance();
        self.expect(&Lexeme::Colon);
        let ty = self.parse_type();
        let value = match (literal, &ty) {
            (Literal::Int(n), Type::Index | Type::Int(_)) => Literal::Int(n),
            (Literal::Int(n), Type::Float(_)) => Literal::Float(n as f64),
            (Literal::Float(x), Type::Float(_)) => Literal::Float(x),
            _ => {
                self.error_at(lit_span, &format!("invalid literal for type {}", ty));
                literal
            }
        };
        let vals = self.bind_results(id, results, vec![ty], "constant");
        OpKind::Constant {
            result: vals[0],
            value,
        }
    }

    /// `gpu.alloc [async] [[deps]] [(sizes)] : memref<...>`
    fn parse_alloc(&mut self, id: OpId, results: &[Spanned<String>]) -> OpKind {
        let (is_async, deps) = self.parse_async_clause();
        let dynamic_sizes = if self.at(&Lexeme::LParen) {
            self.parse_value_list(&Lexeme::LParen, &Lexeme::RParen, is_index, "an index")
        } else {
            Vec::new()
        };
        self.expect(&Lexeme::Colon);
        let ty_span = self.current_span();
        let ty = self.parse_type();
        match &ty {
            Type::MemRef(mt) => {
                let dynamic = mt.shape.iter().filter(|d| **d == Dim::Dynamic).count();
                if dynamic != dynamic_sizes.len() {
                    self.error_at(
                        ty_span,
                        &format!(
                            "{} has {} dynamic dimensions but {} sizes were given",
                            ty,
                            dynamic,
                            dynamic_sizes.len()
                        ),
                    );
                }
            }
            other => {
                let msg = format!("'gpu.alloc' must produce a ranked memref, found {}", other);
                self.error_at(ty_span, &msg);
            }
        }
        let mut types = vec![ty];
        if is_async {
            types.push(Type::Token);
        }
        let vals = self.bind_results(id, results, types, "gpu.alloc");
        OpKind::Alloc {
            memref: vals[0],
            token: is_async.then(|| vals[1]),
            deps,
            dynamic_sizes,
        }
    }

    /// `gpu.launch_func [async] [[deps]] @mod::@kernel blocks in (..) threads in (..)
    /// [dynamic_shared_memory_size %s] [args(..)]`
    fn parse_launch(&mut self, id: OpId, results: &[Spanned<String>]) -> OpKind {
        let (is_async, deps) = self.parse_async_clause();
        let kernel_module = self.expect_symbol().node;
        self.expect(&Lexeme::ColonColon);
        let kernel_name = self.expect_symbol().node;
        self.expect_word("blocks");
        self.expect_word("in");
        let grid = self.parse_triple();
        self.expect_word("threads");
        self.expect_word("in");
        let block = self.parse_triple();
        let dynamic_shared_memory = if self.eat_word("dynamic_shared_memory_size") {
            Some(self.use_value_where(|t| *t == Type::Int(32), "an i32"))
        } else {
            None
        };
        let args = if self.eat_word("args") {
            self.parse_value_list(&Lexeme::LParen, &Lexeme::RParen, |_| true, "")
        } else {
            Vec::new()
        };
        let token = self.bind_token(id, results, is_async, "gpu.launch_func");
        OpKind::LaunchFunc(LaunchFunc {
            kernel_module,
            kernel_name,
            grid,
            block,
            dynamic_shared_memory,
            args,
            deps,
            token,
        })
    }

    /// `async.execute { ... async.yield ... }`
    fn parse_execute(&mut self, id: OpId, results: &[Spanned<String>], span: Span) -> OpKind {
        let outer = self.scope.clone();
        self.region_depth += 1;
        let body = self.parse_block();
        self.region_depth -= 1;
        self.scope = outer;

        let mut types = vec![Type::AsyncToken];
        match body.ops.last().map(|op| &op.kind) {
            Some(OpKind::Yield { operands }) => {
                for &v in operands {
                    types.push(Type::AsyncValue(Box::new(self.module.ty(v).clone())));
                }
            }
            _ => self.error_at(span, "'async.execute' body must end with 'async.yield'"),
        }
        let results = self.bind_results(id, results, types, "async.execute");
        OpKind::Execute { results, body }
    }

    /// `[async] [[%a, %b]]`
    fn parse_async_clause(&mut self) -> (bool, Vec<ValueId>) {
        let is_async = self.eat(&Lexeme::Async);
        let deps = if self.at(&Lexeme::LBracket) {
            self.parse_value_list(
                &Lexeme::LBracket,
                &Lexeme::RBracket,
                Type::is_token,
                "a !gpu.async.token",
            )
        } else {
            Vec::new()
        };
        (is_async, deps)
    }

    fn parse_triple(&mut self) -> [ValueId; 3] {
        let span = self.current_span();
        let values = self.parse_value_list(&Lexeme::LParen, &Lexeme::RParen, is_index, "an index");
        match <[ValueId; 3]>::try_from(values) {
            Ok(triple) => triple,
            Err(values) => {
                self.error_at(
                    span.merge(self.prev_span()),
                    &format!("expected 3 launch dimensions, found {}", values.len()),
                );
                let poison = self.poison();
                [poison; 3]
            }
        }
    }

    /// Comma-separated values up to the end of the operation.
    fn parse_trailing_values(&mut self) -> Vec<ValueId> {
        let mut values = Vec::new();
        if matches!(self.peek(), Lexeme::Value(_)) {
            loop {
                values.push(self.use_value());
                if !self.eat(&Lexeme::Comma) {
                    break;
                }
            }
        }
        values
    }

    fn parse_value_list(
        &mut self,
        open: &Lexeme,
        close: &Lexeme,
        accept: fn(&Type) -> bool,
        what: &str,
    ) -> Vec<ValueId> {
        let mut values = Vec::new();
        self.expect(open);
        while !self.at(close) && !self.at(&Lexeme::Eof) {
            values.push(self.use_value_where(accept, what));
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(close);
        values
    }

    // ─── Values ───────────────────────────────────────────────────

    fn expect_value_name(&mut self) -> Spanned<String> {
        if let Lexeme::Value(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current(&format!(
                "expected value name, found {}",
                self.peek().description()
            ));
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    /// A placeholder standing in for a value that failed to parse. The
    /// parse as a whole fails, so it never reaches the lowering.
    fn poison(&mut self) -> ValueId {
        self.module.new_value(Type::Index, ValueDef::Arg)
    }

    fn use_value(&mut self) -> ValueId {
        let name = self.expect_value_name();
        match self.scope.get(&name.node) {
            Some(&v) => v,
            None => {
                if name.node != "_error_" {
                    self.error_at(name.span, &format!("use of undefined value '%{}'", name.node));
                }
                self.poison()
            }
        }
    }

    fn use_value_where(&mut self, accept: fn(&Type) -> bool, what: &str) -> ValueId {
        let span = self.current_span();
        let v = self.use_value();
        let ty = self.module.ty(v);
        if !accept(ty) {
            let msg = format!("expected {}, found value of type {}", what, ty);
            self.error_at(span, &msg);
        }
        v
    }

    fn define(&mut self, name: Spanned<String>, ty: Type, def: ValueDef) -> ValueId {
        if self.scope.contains_key(&name.node) {
            self.error_at(name.span, &format!("redefinition of value '%{}'", name.node));
        }
        let v = self.module.new_named_value(ty, def, &name.node);
        self.scope.insert(name.node, v);
        v
    }

    /// Define the operation's results. Always returns one value per type.
    fn bind_results(
        &mut self,
        op: OpId,
        names: &[Spanned<String>],
        types: Vec<Type>,
        op_name: &str,
    ) -> Vec<ValueId> {
        if names.len() != types.len() {
            let span = names.first().map_or(self.prev_span(), |n| n.span);
            self.error_at(
                span,
                &format!(
                    "'{}' produces {} result(s) here, but {} name(s) were given",
                    op_name,
                    types.len(),
                    names.len()
                ),
            );
            return types
                .into_iter()
                .map(|ty| self.module.new_value(ty, ValueDef::Arg))
                .collect();
        }
        names
            .iter()
            .zip(types)
            .enumerate()
            .map(|(index, (name, ty))| {
                let def = ValueDef::Result {
                    op,
                    index: index as u32,
                };
                self.define(name.clone(), ty, def)
            })
            .collect()
    }

    fn bind_token(
        &mut self,
        op: OpId,
        names: &[Spanned<String>],
        is_async: bool,
        op_name: &str,
    ) -> Option<ValueId> {
        let types = if is_async { vec![Type::Token] } else { Vec::new() };
        self.bind_results(op, names, types, op_name).first().copied()
    }

    // ─── Types ────────────────────────────────────────────────────

    fn parse_type(&mut self) -> Type {
        let span = self.current_span();
        let ty = match self.peek().clone() {
            Lexeme::Ident(name) => scalar_type(&name).ok_or_else(|| format!("unknown type '{}'", name)),
            Lexeme::Dialect(name) => match name.as_str() {
                "gpu.async.token" => Ok(Type::Token),
                "async.token" => Ok(Type::AsyncToken),
                _ => Err(format!("unknown type '!{}'", name)),
            },
            Lexeme::MemRef(body) => parse_memref_body(&body),
            other => Err(format!("expected type, found {}", other.description())),
        };
        self.advance();
        match ty {
            Ok(ty) => ty,
            Err(msg) => {
                self.error_at(span, &msg);
                Type::Index
            }
        }
    }

    // ─── Token helpers ────────────────────────────────────────────

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn advance(&mut self) -> &Spanned<Lexeme> {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, token: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Span {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            span
        } else {
            self.error_at_current(&format!(
                "expected {}, found {}",
                token.description(),
                self.peek().description()
            ));
            self.current_span()
        }
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Lexeme::Ident(name) if name == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.at_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) {
        if !self.eat_word(word) {
            self.error_at_current(&format!(
                "expected '{}', found {}",
                word,
                self.peek().description()
            ));
        }
    }

    fn expect_ident(&mut self) -> Spanned<String> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current(&format!(
                "expected identifier, found {}",
                self.peek().description()
            ));
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    fn expect_symbol(&mut self) -> Spanned<String> {
        if let Lexeme::Symbol(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current(&format!(
                "expected symbol name, found {}",
                self.peek().description()
            ));
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        self.diagnostics
            .push(Diagnostic::error(msg.to_string(), self.current_span()));
    }

    fn error_at(&mut self, span: Span, msg: &str) {
        self.diagnostics.push(Diagnostic::error(msg.to_string(), span));
    }

    fn error_with_help(&mut self, msg: &str, help: &str) {
        self.diagnostics.push(
            Diagnostic::error(msg.to_string(), self.current_span()).with_help(help.to_string()),
        );
    }
}

fn is_memref(ty: &Type) -> bool {
    matches!(ty, Type::MemRef(_) | Type::UnrankedMemRef(_))
}

fn is_index(ty: &Type) -> bool {
    *ty == Type::Index
}

fn is_scalar(ty: &Type) -> bool {
    matches!(ty, Type::Int(_) | Type::Float(_) | Type::Index)
}

/// `index`, `iN` or `f16`/`f32`/`f64`.
fn scalar_type(name: &str) -> Option<Type> {
    match name {
        "index" => Some(Type::Index),
        "f16" => Some(Type::Float(16)),
        "f32" => Some(Type::Float(32)),
        "f64" => Some(Type::Float(64)),
        _ => {
            let width: u32 = name.strip_prefix('i')?.parse().ok()?;
            (1..=128).contains(&width).then_some(Type::Int(width))
        }
    }
}

/// The inside of `memref<...>`: `4x?xf32`, `*xf32`, or a shape followed by
/// `, strided<[s, ...], offset: o>`.
fn parse_memref_body(body: &str) -> Result<Type, String> {
    let (shape_part, layout_part) = match body.find(',') {
        Some(i) => (&body[..i], Some(body[i + 1..].trim())),
        None => (body, None),
    };
    let shape_part = shape_part.trim();

    if let Some(elem) = shape_part.strip_prefix("*x") {
        if layout_part.is_some() {
            return Err("unranked memref cannot have a layout".to_string());
        }
        return Ok(Type::UnrankedMemRef(Box::new(element_type(elem)?)));
    }

    let mut rest = shape_part;
    let mut shape = Vec::new();
    loop {
        if let Some(r) = rest.strip_prefix("?x") {
            shape.push(Dim::Dynamic);
            rest = r;
            continue;
        }
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && rest[digits..].starts_with('x') {
            let n = rest[..digits]
                .parse()
                .map_err(|_| format!("memref dimension '{}' is out of range", &rest[..digits]))?;
            shape.push(Dim::Static(n));
            rest = &rest[digits + 1..];
            continue;
        }
        break;
    }

    let mut memref = MemRefType::new(shape, element_type(rest)?);
    if let Some(layout) = layout_part {
        memref.layout = parse_strided_layout(layout, memref.rank())?;
    }
    Ok(Type::MemRef(memref))
}

fn element_type(text: &str) -> Result<Type, String> {
    scalar_type(text.trim()).ok_or_else(|| format!("unsupported memref element type '{}'", text))
}

fn parse_strided_layout(text: &str, rank: usize) -> Result<Layout, String> {
    const FORM: &str = "expected layout `strided<[s, ...], offset: o>`";
    let inner = text
        .strip_prefix("strided<")
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| FORM.to_string())?
        .trim();
    let inner = inner.strip_prefix('[').ok_or_else(|| FORM.to_string())?;
    let close = inner.find(']').ok_or_else(|| FORM.to_string())?;
    let strides = inner[..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_dim)
        .collect::<Result<Vec<_>, _>>()?;
    let rest = inner[close + 1..].trim();
    let offset = if rest.is_empty() {
        Dim::Static(0)
    } else {
        let value = rest
            .strip_prefix(',')
            .map(str::trim)
            .and_then(|s| s.strip_prefix("offset:"))
            .ok_or_else(|| FORM.to_string())?;
        parse_dim(value.trim())?
    };
    if strides.len() != rank {
        return Err(format!(
            "layout has {} strides but the memref has rank {}",
            strides.len(),
            rank
        ));
    }
    Ok(Layout::Strided { strides, offset })
}

fn parse_dim(text: &str) -> Result<Dim, String> {
    if text == "?" {
        return Ok(Dim::Dynamic);
    }
    text.parse()
        .map(Dim::Static)
        .map_err(|_| format!("invalid stride or offset '{}'", text))
}
