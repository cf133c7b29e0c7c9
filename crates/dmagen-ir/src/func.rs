//! Functions: value and statement storage plus tree navigation.

use crate::arena::{Arena, Handle};
use crate::stmt::{Block, ForStmt, Operation, Statement, StatementKind, Value, ValueDef};
use crate::types::{MemRefType, Type};

/// An IR function: arguments, a statement tree, and the arenas backing it.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<Handle<Value>>,
    pub values: Arena<Value>,
    pub statements: Arena<Statement>,
    /// Top-level statements.
    pub body: Block,
}

impl Function {
    /// Creates an empty function with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            values: Arena::new(),
            statements: Arena::new(),
            body: Vec::new(),
        }
    }

    /// Appends a formal parameter.
    pub fn add_argument(&mut self, name: impl Into<String>, ty: Type) -> Handle<Value> {
        let handle = self.values.append(Value {
            name: Some(name.into()),
            ty,
            def: ValueDef::Argument(self.arguments.len()),
        });
        self.arguments.push(handle);
        handle
    }

    pub fn value_type(&self, value: Handle<Value>) -> &Type {
        &self.values[value].ty
    }

    pub fn memref_type(&self, value: Handle<Value>) -> Option<&MemRefType> {
        self.values.try_get(value)?.ty.as_memref()
    }

    /// The statement defining `value`: the operation producing it or the loop
    /// owning it as induction variable. `None` for arguments.
    pub fn defining_statement(&self, value: Handle<Value>) -> Option<Handle<Statement>> {
        match self.values[value].def {
            ValueDef::Argument(_) => None,
            ValueDef::InductionVar(stmt) | ValueDef::Result(stmt) => Some(stmt),
        }
    }

    /// The operation producing `value`, if it is an operation result.
    pub fn defining_op(&self, value: Handle<Value>) -> Option<&Operation> {
        match self.values[value].def {
            ValueDef::Result(stmt) => self.statements[stmt].as_op(),
            _ => None,
        }
    }

    pub fn as_for(&self, stmt: Handle<Statement>) -> Option<&ForStmt> {
        self.statements[stmt].as_for()
    }

    pub fn as_op(&self, stmt: Handle<Statement>) -> Option<&Operation> {
        self.statements[stmt].as_op()
    }

    pub fn parent(&self, stmt: Handle<Statement>) -> Option<Handle<Statement>> {
        self.statements[stmt].parent
    }

    /// The block owned by `parent` (`None` for the function body).
    /// Operations own no block and yield an empty slice.
    pub fn block(&self, parent: Option<Handle<Statement>>) -> &[Handle<Statement>] {
        match parent {
            None => &self.body,
            Some(stmt) => match &self.statements[stmt].kind {
                StatementKind::For(for_stmt) => &for_stmt.body,
                StatementKind::Op(_) => &[],
            },
        }
    }

    pub fn block_mut(&mut self, parent: Option<Handle<Statement>>) -> &mut Block {
        match parent {
            None => &mut self.body,
            Some(stmt) => match &mut self.statements[stmt].kind {
                StatementKind::For(for_stmt) => &mut for_stmt.body,
                StatementKind::Op(op) => {
                    panic!("{} statement {stmt:?} owns no block", op.mnemonic())
                }
            },
        }
    }

    /// Position of `stmt` within its parent block.
    pub fn position_in_block(&self, stmt: Handle<Statement>) -> Option<usize> {
        self.block(self.parent(stmt)).iter().position(|&s| s == stmt)
    }

    /// Top-level `for` statements, in program order.
    pub fn top_level_loops(&self) -> Vec<Handle<Statement>> {
        self.body
            .iter()
            .copied()
            .filter(|&stmt| self.statements[stmt].is_for())
            .collect()
    }

    /// Enclosing statements of `stmt`, innermost first.
    pub fn ancestors(&self, stmt: Handle<Statement>) -> Ancestors<'_> {
        Ancestors {
            func: self,
            next: self.parent(stmt),
        }
    }

    /// `true` if `ancestor` is `stmt` or encloses it.
    pub fn is_ancestor_or_self(&self, ancestor: Handle<Statement>, stmt: Handle<Statement>) -> bool {
        stmt == ancestor || self.ancestors(stmt).any(|s| s == ancestor)
    }

    /// Visits `stmt` and everything nested in it in program order.
    pub fn walk(&self, stmt: Handle<Statement>, visit: &mut impl FnMut(Handle<Statement>)) {
        visit(stmt);
        if let StatementKind::For(for_stmt) = &self.statements[stmt].kind {
            for &child in &for_stmt.body {
                self.walk(child, visit);
            }
        }
    }

    /// Visits every statement of the function in program order.
    pub fn walk_all(&self, visit: &mut impl FnMut(Handle<Statement>)) {
        for &stmt in &self.body {
            self.walk(stmt, visit);
        }
    }

    /// `stmt` and every statement nested in it, in program order.
    pub fn subtree(&self, stmt: Handle<Statement>) -> Vec<Handle<Statement>> {
        let mut out = Vec::new();
        self.walk(stmt, &mut |s| out.push(s));
        out
    }

    /// Statements dominated by `start`: `start`, its following siblings, and
    /// everything nested in them.
    pub fn dominated_region(&self, start: Handle<Statement>) -> Vec<Handle<Statement>> {
        let block = self.block(self.parent(start));
        let first = block.iter().position(|&s| s == start).unwrap_or(block.len());
        let mut out = Vec::new();
        for &stmt in &block[first..] {
            self.walk(stmt, &mut |s| out.push(s));
        }
        out
    }
}

/// Iterator over the enclosing statements of a statement.
pub struct Ancestors<'a> {
    func: &'a Function,
    next: Option<Handle<Statement>>,
}

impl Iterator for Ancestors<'_> {
    type Item = Handle<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.func.parent(current);
        Some(current)
    }
}
