//! Text dump of functions and modules.
//!
//! The output is the same syntax `dmagen-parser` reads, so dumps can be fed
//! back into the tool.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::Module;
use crate::arena::Handle;
use crate::func::Function;
use crate::stmt::{AffineBound, Operation, Statement, StatementKind, Value};

/// Renders every function of a module, separated by blank lines.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();
    for (i, (_, func)) in module.functions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&dump_function(func));
    }
    out
}

/// Renders one function.
pub fn dump_function(func: &Function) -> String {
    let mut printer = Printer::new(func);
    printer.print_function();
    printer.out
}

struct Printer<'a> {
    func: &'a Function,
    names: HashMap<Handle<Value>, String>,
    out: String,
}

impl<'a> Printer<'a> {
    fn new(func: &'a Function) -> Self {
        let mut printer = Self {
            func,
            names: HashMap::new(),
            out: String::new(),
        };
        printer.assign_names();
        printer
    }

    /// Named values keep their names; the rest are numbered in program
    /// order, skipping numbers already taken by a source name.
    fn assign_names(&mut self) {
        let func = self.func;
        let taken: HashSet<&str> = func
            .values
            .iter()
            .filter_map(|(_, v)| v.name.as_deref())
            .collect();

        let mut order: Vec<Handle<Value>> = func.arguments.clone();
        func.walk_all(&mut |stmt| match &func.statements[stmt].kind {
            StatementKind::For(for_stmt) => order.push(for_stmt.induction_var),
            StatementKind::Op(op) => order.extend(op.result()),
        });

        let mut next = 0usize;
        for value in order {
            let name = match &func.values[value].name {
                Some(name) => name.clone(),
                None => loop {
                    let candidate = next.to_string();
                    next += 1;
                    if !taken.contains(candidate.as_str()) {
                        break candidate;
                    }
                },
            };
            self.names.insert(value, name);
        }
    }

    fn name(&self, value: Handle<Value>) -> String {
        match self.names.get(&value) {
            Some(name) => format!("%{name}"),
            None => format!("%<undefined {}>", value.index()),
        }
    }

    fn names(&self, values: &[Handle<Value>]) -> String {
        values
            .iter()
            .map(|&v| self.name(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn subscript(&self, memref: Handle<Value>, indices: &[Handle<Value>]) -> String {
        format!("{}[{}]", self.name(memref), self.names(indices))
    }

    fn ty(&self, value: Handle<Value>) -> String {
        match self.func.values.try_get(value) {
            Some(v) => v.ty.to_string(),
            None => "<invalid>".to_string(),
        }
    }

    /// `map(dims)[symbols]`, with the operand list split at the map's
    /// dimension count.
    fn applied_map(&self, map: &crate::AffineMap, operands: &[Handle<Value>]) -> String {
        let split = map.num_dims.min(operands.len());
        let (dims, symbols) = operands.split_at(split);
        let mut text = format!("{map}({})", self.names(dims));
        if !symbols.is_empty() {
            let _ = write!(text, "[{}]", self.names(symbols));
        }
        text
    }

    fn bound(&self, bound: &AffineBound) -> String {
        if let Some(c) = bound.as_constant() {
            return c.to_string();
        }
        if let [only] = bound.operands.as_slice() {
            if bound.map == crate::AffineMap::identity(1) {
                return self.name(*only);
            }
        }
        self.applied_map(&bound.map, &bound.operands)
    }

    fn print_function(&mut self) {
        let func = self.func;
        let args = func
            .arguments
            .iter()
            .map(|&a| format!("{}: {}", self.name(a), self.ty(a)))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(self.out, "func @{}({args}) {{", func.name);
        for &stmt in &func.body {
            self.print_statement(stmt, 1);
        }
        self.out.push_str("}\n");
    }

    fn print_statement(&mut self, stmt: Handle<Statement>, depth: usize) {
        let func = self.func;
        let indent = "  ".repeat(depth);
        match &func.statements[stmt].kind {
            StatementKind::For(for_stmt) => {
                let _ = write!(
                    self.out,
                    "{indent}for {} = {} to {}",
                    self.name(for_stmt.induction_var),
                    self.bound(&for_stmt.lower),
                    self.bound(&for_stmt.upper)
                );
                if for_stmt.step != 1 {
                    let _ = write!(self.out, " step {}", for_stmt.step);
                }
                self.out.push_str(" {\n");
                for &child in &for_stmt.body {
                    self.print_statement(child, depth + 1);
                }
                let _ = writeln!(self.out, "{indent}}}");
            }
            StatementKind::Op(op) => {
                let line = self.op(op);
                let _ = writeln!(self.out, "{indent}{line}");
            }
        }
    }

    fn op(&self, op: &Operation) -> String {
        match op {
            Operation::Constant { result, value } => {
                format!("{} = constant {value} : index", self.name(*result))
            }
            Operation::AffineApply {
                result,
                map,
                operands,
            } => format!(
                "{} = affine_apply {}",
                self.name(*result),
                self.applied_map(map, operands)
            ),
            Operation::Alloc { result } => {
                format!("{} = alloc() : {}", self.name(*result), self.ty(*result))
            }
            Operation::Dealloc { memref } => {
                format!("dealloc {} : {}", self.name(*memref), self.ty(*memref))
            }
            Operation::Load {
                result,
                memref,
                indices,
            } => format!(
                "{} = load {} : {}",
                self.name(*result),
                self.subscript(*memref, indices),
                self.ty(*memref)
            ),
            Operation::Store {
                value,
                memref,
                indices,
            } => format!(
                "store {}, {} : {}",
                self.name(*value),
                self.subscript(*memref, indices),
                self.ty(*memref)
            ),
            Operation::DmaStart {
                source,
                source_indices,
                destination,
                destination_indices,
                num_elements,
                tag,
                tag_indices,
            } => format!(
                "dma_start {}, {}, {}, {} : {}, {}, {}",
                self.subscript(*source, source_indices),
                self.subscript(*destination, destination_indices),
                self.name(*num_elements),
                self.subscript(*tag, tag_indices),
                self.ty(*source),
                self.ty(*destination),
                self.ty(*tag)
            ),
            Operation::DmaWait {
                tag,
                tag_indices,
                num_elements,
            } => format!(
                "dma_wait {}, {} : {}",
                self.subscript(*tag, tag_indices),
                self.name(*num_elements),
                self.ty(*tag)
            ),
            Operation::Binary {
                result,
                op,
                lhs,
                rhs,
            } => format!(
                "{} = {} {}, {} : {}",
                self.name(*result),
                op.mnemonic(),
                self.name(*lhs),
                self.name(*rhs),
                self.ty(*result)
            ),
            Operation::Return => "return".to_string(),
        }
    }
}
