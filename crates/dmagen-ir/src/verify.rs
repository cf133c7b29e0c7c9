//! Structural verification of a function.

use std::collections::HashSet;

use crate::arena::Handle;
use crate::error::IrError;
use crate::func::Function;
use crate::stmt::{AffineBound, Operation, Statement, StatementKind, Value};
use crate::types::Type;

/// Checks parent links, def-before-use along the statement tree, subscript
/// arity, operand types, and affine map arities.
///
/// Returns the first problem found.
pub fn verify_function(func: &Function) -> Result<(), IrError> {
    let mut visible: HashSet<Handle<Value>> = func.arguments.iter().copied().collect();
    verify_block(func, None, &func.body, &mut visible)
}

fn verify_block(
    func: &Function,
    parent: Option<Handle<Statement>>,
    block: &[Handle<Statement>],
    visible: &mut HashSet<Handle<Value>>,
) -> Result<(), IrError> {
    let mut defined = Vec::new();
    let result = block.iter().try_for_each(|&stmt| {
        let Some(statement) = func.statements.try_get(stmt) else {
            return Err(IrError::BadParent { stmt: stmt.index() });
        };
        if statement.parent != parent {
            return Err(IrError::BadParent { stmt: stmt.index() });
        }
        match &statement.kind {
            StatementKind::For(for_stmt) => {
                if for_stmt.step == 0 {
                    return Err(IrError::ZeroStep);
                }
                verify_bound(func, stmt, &for_stmt.lower, visible)?;
                verify_bound(func, stmt, &for_stmt.upper, visible)?;
                visible.insert(for_stmt.induction_var);
                let body = verify_block(func, Some(stmt), &for_stmt.body, visible);
                visible.remove(&for_stmt.induction_var);
                body
            }
            StatementKind::Op(op) => {
                verify_op(func, stmt, op, visible)?;
                if let Some(result) = op.result() {
                    visible.insert(result);
                    defined.push(result);
                }
                Ok(())
            }
        }
    });
    for value in defined {
        visible.remove(&value);
    }
    result
}

fn check_visible(
    stmt: Handle<Statement>,
    value: Handle<Value>,
    visible: &HashSet<Handle<Value>>,
) -> Result<(), IrError> {
    if visible.contains(&value) {
        Ok(())
    } else {
        Err(IrError::UndefinedValue {
            value: value.index(),
            stmt: stmt.index(),
        })
    }
}

fn check_index(func: &Function, op: &'static str, value: Handle<Value>) -> Result<(), IrError> {
    match func.value_type(value) {
        Type::Index => Ok(()),
        other => Err(IrError::NotAnIndex {
            op,
            found: other.to_string(),
        }),
    }
}

fn verify_bound(
    func: &Function,
    stmt: Handle<Statement>,
    bound: &AffineBound,
    visible: &HashSet<Handle<Value>>,
) -> Result<(), IrError> {
    if bound.map.num_inputs() != bound.operands.len() {
        return Err(IrError::MapArity {
            op: "for",
            expected: bound.map.num_inputs(),
            found: bound.operands.len(),
        });
    }
    if bound.map.results.is_empty() {
        return Err(IrError::MapResults { op: "for", found: 0 });
    }
    for &operand in &bound.operands {
        check_visible(stmt, operand, visible)?;
        check_index(func, "for", operand)?;
    }
    Ok(())
}

fn verify_op(
    func: &Function,
    stmt: Handle<Statement>,
    op: &Operation,
    visible: &HashSet<Handle<Value>>,
) -> Result<(), IrError> {
    let name = op.mnemonic();
    for operand in op.operands() {
        if !func.values.contains(operand) {
            return Err(IrError::UndefinedValue {
                value: operand.index(),
                stmt: stmt.index(),
            });
        }
        check_visible(stmt, operand, visible)?;
    }

    for (memref, indices) in op.memref_accesses() {
        let Some(ty) = func.memref_type(memref) else {
            return Err(IrError::NotAMemRef {
                op: name,
                found: func.value_type(memref).to_string(),
            });
        };
        if ty.rank() != indices.len() {
            return Err(IrError::SubscriptCount {
                op: name,
                rank: ty.rank(),
                found: indices.len(),
            });
        }
        for &index in indices {
            check_index(func, name, index)?;
        }
    }

    match op {
        Operation::AffineApply { map, operands, .. } => {
            if map.num_inputs() != operands.len() {
                return Err(IrError::MapArity {
                    op: name,
                    expected: map.num_inputs(),
                    found: operands.len(),
                });
            }
            if map.num_results() != 1 {
                return Err(IrError::MapResults {
                    op: name,
                    found: map.num_results(),
                });
            }
            for &operand in operands {
                check_index(func, name, operand)?;
            }
        }
        Operation::Alloc { result } => match func.memref_type(*result) {
            Some(ty) if ty.has_static_shape() => {}
            Some(ty) => return Err(IrError::DynamicAlloc { ty: ty.to_string() }),
            None => {
                return Err(IrError::NotAMemRef {
                    op: name,
                    found: func.value_type(*result).to_string(),
                })
            }
        },
        Operation::Dealloc { memref } => {
            if func.memref_type(*memref).is_none() {
                return Err(IrError::NotAMemRef {
                    op: name,
                    found: func.value_type(*memref).to_string(),
                });
            }
        }
        Operation::DmaStart { num_elements, .. } | Operation::DmaWait { num_elements, .. } => {
            check_index(func, name, *num_elements)?;
        }
        _ => {}
    }
    Ok(())
}
