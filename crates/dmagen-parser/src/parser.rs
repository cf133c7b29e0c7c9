//! Recursive-descent parser producing dmagen IR.

use std::collections::HashMap;

use dmagen_ir::{
    AffineBinaryOp, AffineBound, AffineExpr, AffineMap, BinaryOp, Builder, Dimension, Function,
    Handle, MemRefType, Module, Operation, Scalar, Statement, Type, Value,
};

use crate::ParseError;
use crate::lexer::{Token, TokenKind};

/// Names visible at a point of the function, innermost scope last.
#[derive(Default)]
struct Scopes {
    stack: Vec<HashMap<String, Handle<Value>>>,
}

impl Scopes {
    fn push(&mut self) {
        self.stack.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn lookup(&self, name: &str) -> Option<Handle<Value>> {
        self.stack.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn insert(&mut self, name: &str, value: Handle<Value>) {
        if let Some(scope) = self.stack.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }
}

/// Dimension and symbol names of the map being parsed.
struct MapIds {
    dims: Vec<String>,
    symbols: Vec<String>,
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// `tokens` must end with [`TokenKind::Eof`].
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    // ---------------------------------------------------------------------
    // Token plumbing
    // ---------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error_at(token: &Token, message: impl Into<String>) -> ParseError {
        ParseError {
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        Self::error_at(
            token,
            format!("expected {expected}, found {}", token.kind.describe()),
        )
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Word(w) if w == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{word}'")))
        }
    }

    fn word(&mut self) -> Result<(String, Token), ParseError> {
        match &self.peek().kind {
            TokenKind::Word(w) => {
                let w = w.clone();
                Ok((w, self.advance()))
            }
            _ => Err(self.unexpected("a keyword")),
        }
    }

    fn value_name(&mut self) -> Result<(String, Token), ParseError> {
        match &self.peek().kind {
            TokenKind::Value(name) => {
                let name = name.clone();
                Ok((name, self.advance()))
            }
            _ => Err(self.unexpected("a value")),
        }
    }

    fn integer(&mut self) -> Result<i64, ParseError> {
        let start = self.peek().clone();
        let negative = self.eat(&TokenKind::Minus);
        let (digits, token) = match &self.peek().kind {
            TokenKind::Word(w) => {
                let w = w.clone();
                (w, self.advance())
            }
            _ => return Err(self.unexpected("an integer")),
        };
        let text = if negative {
            format!("-{digits}")
        } else {
            digits
        };
        text.parse().map_err(|_| {
            Self::error_at(
                if negative { &start } else { &token },
                format!("expected an integer, found '{text}'"),
            )
        })
    }

    // ---------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------

    fn use_value(&mut self, scopes: &Scopes) -> Result<Handle<Value>, ParseError> {
        let (name, token) = self.value_name()?;
        scopes
            .lookup(&name)
            .ok_or_else(|| Self::error_at(&token, format!("use of undefined value '%{name}'")))
    }

    /// Binds `name` in the innermost scope. Purely numeric names are not
    /// kept on the value, so dumps renumber them.
    fn define(
        func: &mut Function,
        scopes: &mut Scopes,
        name: &str,
        value: Handle<Value>,
        token: &Token,
    ) -> Result<(), ParseError> {
        if scopes.lookup(name).is_some() {
            return Err(Self::error_at(token, format!("redefinition of '%{name}'")));
        }
        scopes.insert(name, value);
        if !name.chars().all(|c| c.is_ascii_digit()) {
            func.values[value].name = Some(name.to_string());
        }
        Ok(())
    }

    fn value_list(
        &mut self,
        scopes: &Scopes,
        open: TokenKind,
        close: TokenKind,
    ) -> Result<Vec<Handle<Value>>, ParseError> {
        self.expect(open)?;
        let mut values = Vec::new();
        if self.eat(&close) {
            return Ok(values);
        }
        loop {
            values.push(self.use_value(scopes)?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(values)
    }

    /// `%A[%i, %j]`; `%A` must be a memref.
    fn subscript(
        &mut self,
        func: &Function,
        scopes: &Scopes,
    ) -> Result<(Handle<Value>, Vec<Handle<Value>>), ParseError> {
        let token = self.peek().clone();
        let memref = self.use_value(scopes)?;
        if func.memref_type(memref).is_none() {
            return Err(Self::error_at(
                &token,
                format!("{} is not a memref", token.kind.describe()),
            ));
        }
        let indices = self.value_list(scopes, TokenKind::LBracket, TokenKind::RBracket)?;
        Ok((memref, indices))
    }

    /// Parses `: type` and checks it against the type of `value`.
    fn type_annotation(&mut self, func: &Function, value: Handle<Value>) -> Result<(), ParseError> {
        let token = self.peek().clone();
        let ty = self.ty()?;
        let actual = func.value_type(value);
        if &ty != actual {
            return Err(Self::error_at(
                &token,
                format!("type mismatch: value has type {actual}, annotated {ty}"),
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------------

    fn ty(&mut self) -> Result<Type, ParseError> {
        let (word, token) = self.word()?;
        match word.as_str() {
            "index" => Ok(Type::Index),
            "memref" => self.memref_type().map(Type::MemRef),
            name => Scalar::from_name(name)
                .map(Type::Scalar)
                .ok_or_else(|| Self::error_at(&token, format!("unknown type '{name}'"))),
        }
    }

    /// `<4x?xf32, 1>`, after the `memref` keyword.
    fn memref_type(&mut self) -> Result<MemRefType, ParseError> {
        self.expect(TokenKind::Less)?;
        let (layout, token) = self.word()?;
        let mut parts: Vec<&str> = layout.split('x').collect();
        let element = parts
            .pop()
            .and_then(Scalar::from_name)
            .ok_or_else(|| Self::error_at(&token, format!("bad memref shape '{layout}'")))?;
        let shape = parts
            .iter()
            .map(|part| match *part {
                "?" => Some(Dimension::Dynamic),
                n => n.parse().ok().map(Dimension::Fixed),
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Self::error_at(&token, format!("bad memref shape '{layout}'")))?;
        let memory_space = if self.eat(&TokenKind::Comma) {
            let token = self.peek().clone();
            let space = self.integer()?;
            u32::try_from(space)
                .map_err(|_| Self::error_at(&token, format!("bad memory space {space}")))?
        } else {
            0
        };
        self.expect(TokenKind::Greater)?;
        Ok(MemRefType {
            shape,
            element,
            memory_space,
        })
    }

    // ---------------------------------------------------------------------
    // Affine maps
    // ---------------------------------------------------------------------

    fn id_list(&mut self, open: TokenKind, close: TokenKind) -> Result<Vec<String>, ParseError> {
        self.expect(open)?;
        let mut ids = Vec::new();
        if self.eat(&close) {
            return Ok(ids);
        }
        loop {
            let (id, token) = self.word()?;
            if ids.contains(&id) {
                return Err(Self::error_at(&token, format!("duplicate identifier '{id}'")));
            }
            ids.push(id);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(ids)
    }

    /// `(d0, ..)[s0, ..] -> (expr, ..)`.
    fn affine_map(&mut self) -> Result<AffineMap, ParseError> {
        let dims = self.id_list(TokenKind::LParen, TokenKind::RParen)?;
        let symbols = if self.peek().kind == TokenKind::LBracket {
            self.id_list(TokenKind::LBracket, TokenKind::RBracket)?
        } else {
            Vec::new()
        };
        let ids = MapIds { dims, symbols };
        self.expect(TokenKind::Arrow)?;
        self.expect(TokenKind::LParen)?;
        let mut results = Vec::new();
        loop {
            results.push(self.affine_expr(&ids)?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(AffineMap::new(ids.dims.len(), ids.symbols.len(), results))
    }

    fn affine_expr(&mut self, ids: &MapIds) -> Result<AffineExpr, ParseError> {
        let mut expr = self.affine_term(ids)?;
        loop {
            if self.eat(&TokenKind::Plus) {
                expr = expr + self.affine_term(ids)?;
            } else if self.eat(&TokenKind::Minus) {
                expr = expr - self.affine_term(ids)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn affine_term(&mut self, ids: &MapIds) -> Result<AffineExpr, ParseError> {
        let mut expr = self.affine_unary(ids)?;
        loop {
            let op = if self.eat(&TokenKind::Star) {
                AffineBinaryOp::Mul
            } else if self.eat_word("mod") {
                AffineBinaryOp::Mod
            } else if self.eat_word("floordiv") {
                AffineBinaryOp::FloorDiv
            } else if self.eat_word("ceildiv") {
                AffineBinaryOp::CeilDiv
            } else {
                return Ok(expr);
            };
            let rhs = self.affine_unary(ids)?;
            expr = AffineExpr::binary(op, expr, rhs);
        }
    }

    fn affine_unary(&mut self, ids: &MapIds) -> Result<AffineExpr, ParseError> {
        if self.peek().kind != TokenKind::Minus {
            return self.affine_primary(ids);
        }
        let literal = matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.kind),
            Some(TokenKind::Word(w)) if w.chars().all(|c| c.is_ascii_digit())
        );
        if literal {
            return self.integer().map(AffineExpr::constant);
        }
        self.advance();
        Ok(-self.affine_unary(ids)?)
    }

    fn affine_primary(&mut self, ids: &MapIds) -> Result<AffineExpr, ParseError> {
        if self.eat(&TokenKind::LParen) {
            let expr = self.affine_expr(ids)?;
            self.expect(TokenKind::RParen)?;
            return Ok(expr);
        }
        let (word, token) = match &self.peek().kind {
            TokenKind::Word(_) => self.word()?,
            _ => return Err(self.unexpected("an affine expression")),
        };
        if let Ok(value) = word.parse::<i64>() {
            return Ok(AffineExpr::constant(value));
        }
        if let Some(pos) = ids.dims.iter().position(|d| *d == word) {
            return Ok(AffineExpr::dim(pos));
        }
        if let Some(pos) = ids.symbols.iter().position(|s| *s == word) {
            return Ok(AffineExpr::symbol(pos));
        }
        Err(Self::error_at(
            &token,
            format!("unknown identifier '{word}' in affine expression"),
        ))
    }

    /// A map followed by its `(dims)[symbols]` operands.
    fn applied_map(
        &mut self,
        scopes: &Scopes,
    ) -> Result<(AffineMap, Vec<Handle<Value>>), ParseError> {
        let map = self.affine_map()?;
        let token = self.peek().clone();
        let mut operands = self.value_list(scopes, TokenKind::LParen, TokenKind::RParen)?;
        let num_dims = operands.len();
        if self.peek().kind == TokenKind::LBracket {
            operands.extend(self.value_list(
                scopes,
                TokenKind::LBracket,
                TokenKind::RBracket,
            )?);
        }
        let num_symbols = operands.len() - num_dims;
        if num_dims != map.num_dims || num_symbols != map.num_symbols {
            return Err(Self::error_at(
                &token,
                format!(
                    "map takes {} dims and {} symbols, got {num_dims} and {num_symbols}",
                    map.num_dims, map.num_symbols
                ),
            ));
        }
        Ok((map, operands))
    }

    fn bound(&mut self, scopes: &Scopes) -> Result<AffineBound, ParseError> {
        match &self.peek().kind {
            TokenKind::Value(_) => Ok(AffineBound::value(self.use_value(scopes)?)),
            TokenKind::LParen => {
                let (map, operands) = self.applied_map(scopes)?;
                Ok(AffineBound { map, operands })
            }
            _ => Ok(AffineBound::constant(self.integer()?)),
        }
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    /// Statements up to the closing `}` of the current block.
    fn block(
        &mut self,
        func: &mut Function,
        scopes: &mut Scopes,
        parent: Option<Handle<Statement>>,
    ) -> Result<(), ParseError> {
        while !self.eat(&TokenKind::RBrace) {
            if self.peek().kind == TokenKind::Eof {
                return Err(self.unexpected("'}'"));
            }
            self.statement(func, scopes, parent)?;
        }
        Ok(())
    }

    fn statement(
        &mut self,
        func: &mut Function,
        scopes: &mut Scopes,
        parent: Option<Handle<Statement>>,
    ) -> Result<(), ParseError> {
        let mut builder = Builder::at_end(parent);
        let keyword = match &self.peek().kind {
            TokenKind::Value(_) => return self.assignment(func, scopes, builder),
            TokenKind::Word(w) => w.clone(),
            _ => return Err(self.unexpected("a statement")),
        };
        let token = self.advance();
        match keyword.as_str() {
            "for" => self.for_stmt(func, scopes, builder),
            "store" => {
                let value = self.use_value(scopes)?;
                self.expect(TokenKind::Comma)?;
                let (memref, indices) = self.subscript(func, scopes)?;
                self.expect(TokenKind::Colon)?;
                self.type_annotation(func, memref)?;
                builder.store(func, value, memref, indices);
                Ok(())
            }
            "dealloc" => {
                let memref = self.use_value(scopes)?;
                self.expect(TokenKind::Colon)?;
                self.type_annotation(func, memref)?;
                builder.dealloc(func, memref);
                Ok(())
            }
            "dma_start" => {
                let (source, source_indices) = self.subscript(func, scopes)?;
                self.expect(TokenKind::Comma)?;
                let (destination, destination_indices) = self.subscript(func, scopes)?;
                self.expect(TokenKind::Comma)?;
                let num_elements = self.use_value(scopes)?;
                self.expect(TokenKind::Comma)?;
                let (tag, tag_indices) = self.subscript(func, scopes)?;
                self.expect(TokenKind::Colon)?;
                self.type_annotation(func, source)?;
                self.expect(TokenKind::Comma)?;
                self.type_annotation(func, destination)?;
                self.expect(TokenKind::Comma)?;
                self.type_annotation(func, tag)?;
                builder.op(
                    func,
                    Operation::DmaStart {
                        source,
                        source_indices,
                        destination,
                        destination_indices,
                        num_elements,
                        tag,
                        tag_indices,
                    },
                );
                Ok(())
            }
            "dma_wait" => {
                let (tag, tag_indices) = self.subscript(func, scopes)?;
                self.expect(TokenKind::Comma)?;
                let num_elements = self.use_value(scopes)?;
                self.expect(TokenKind::Colon)?;
                self.type_annotation(func, tag)?;
                builder.dma_wait(func, tag, tag_indices, num_elements);
                Ok(())
            }
            "return" => {
                builder.ret(func);
                Ok(())
            }
            other => Err(Self::error_at(&token, format!("unknown statement '{other}'"))),
        }
    }

    /// `for %i = lb to ub [step N] { .. }`, after the `for` keyword.
    fn for_stmt(
        &mut self,
        func: &mut Function,
        scopes: &mut Scopes,
        mut builder: Builder,
    ) -> Result<(), ParseError> {
        let (name, name_token) = self.value_name()?;
        self.expect(TokenKind::Equals)?;
        let lower = self.bound(scopes)?;
        self.expect_word("to")?;
        let upper = self.bound(scopes)?;
        let step = if self.eat_word("step") {
            let token = self.peek().clone();
            let step = self.integer()?;
            u64::try_from(step)
                .ok()
                .filter(|&s| s > 0)
                .ok_or_else(|| Self::error_at(&token, "loop step must be positive"))?
        } else {
            1
        };
        self.expect(TokenKind::LBrace)?;
        let (stmt, iv) = builder.for_loop(func, lower, upper, step);
        scopes.push();
        let result = Self::define(func, scopes, &name, iv, &name_token)
            .and_then(|()| self.block(func, scopes, Some(stmt)));
        scopes.pop();
        result
    }

    /// `%x = <op> ..`.
    fn assignment(
        &mut self,
        func: &mut Function,
        scopes: &mut Scopes,
        mut builder: Builder,
    ) -> Result<(), ParseError> {
        let (name, name_token) = self.value_name()?;
        self.expect(TokenKind::Equals)?;
        let (op, op_token) = self.word()?;
        let result = match op.as_str() {
            "constant" => {
                let value = self.integer()?;
                self.expect(TokenKind::Colon)?;
                self.expect_word("index")?;
                builder.constant_index(func, value)
            }
            "affine_apply" => {
                let (map, operands) = self.applied_map(scopes)?;
                builder.affine_apply(func, map, operands)
            }
            "alloc" => {
                self.expect(TokenKind::LParen)?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::Colon)?;
                let token = self.peek().clone();
                match self.ty()? {
                    Type::MemRef(ty) => builder.alloc(func, ty),
                    other => {
                        return Err(Self::error_at(
                            &token,
                            format!("alloc needs a memref type, found {other}"),
                        ));
                    }
                }
            }
            "load" => {
                let (memref, indices) = self.subscript(func, scopes)?;
                self.expect(TokenKind::Colon)?;
                self.type_annotation(func, memref)?;
                builder.load(func, memref, indices)
            }
            other => {
                let binary = BinaryOp::from_mnemonic(other).ok_or_else(|| {
                    Self::error_at(&op_token, format!("unknown operation '{other}'"))
                })?;
                let lhs = self.use_value(scopes)?;
                self.expect(TokenKind::Comma)?;
                let rhs = self.use_value(scopes)?;
                self.expect(TokenKind::Colon)?;
                self.type_annotation(func, lhs)?;
                builder.binary(func, binary, lhs, rhs)
            }
        };
        Self::define(func, scopes, &name, result, &name_token)
    }

    // ---------------------------------------------------------------------
    // Functions and modules
    // ---------------------------------------------------------------------

    pub fn function(&mut self) -> Result<Function, ParseError> {
        self.expect_word("func")?;
        let name = match &self.peek().kind {
            TokenKind::Symbol(name) => name.clone(),
            _ => return Err(self.unexpected("a function name")),
        };
        self.advance();
        let mut func = Function::new(name);
        let mut scopes = Scopes::default();
        scopes.push();

        self.expect(TokenKind::LParen)?;
        if !self.eat(&TokenKind::RParen) {
            loop {
                let (arg, token) = self.value_name()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.ty()?;
                if scopes.lookup(&arg).is_some() {
                    return Err(Self::error_at(&token, format!("redefinition of '%{arg}'")));
                }
                let value = func.add_argument(arg.clone(), ty);
                scopes.insert(&arg, value);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        self.expect(TokenKind::LBrace)?;
        self.block(&mut func, &mut scopes, None)?;
        Ok(func)
    }

    pub fn module(&mut self) -> Result<Module, ParseError> {
        let mut module = Module::default();
        while self.peek().kind != TokenKind::Eof {
            let token = self.peek().clone();
            let func = self.function()?;
            if module.function(&func.name).is_some() {
                return Err(Self::error_at(
                    &token,
                    format!("redefinition of function '@{}'", func.name),
                ));
            }
            module.functions.append(func);
        }
        Ok(module)
    }
}
