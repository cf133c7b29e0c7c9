//! Memref use rewriting.

use dmagen_ir::{AffineMap, Builder, Function, Handle, Operation, Statement, StatementKind, Value};

/// Errors from [`replace_all_memref_uses_with`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RewriteError {
    /// The memref feeds an operation that does not dereference it, such as
    /// `dealloc`, so replacing it would change more than addressing.
    #[error("memref {memref} is used by non-dereferencing '{op}'")]
    NonDereferencingUse { memref: usize, op: &'static str },

    /// The memref shows up where an index or data value is expected.
    #[error("memref {memref} is used as a non-memref operand of '{op}'")]
    NonMemRefOperand { memref: usize, op: &'static str },

    #[error("remap takes {expected} indices but the memref has rank {rank}")]
    RemapArity { expected: usize, rank: usize },
}

/// Rewrites indices `(i_0, ..)` of the old memref into indices of the new
/// one: each map result becomes one new index, with the old indices as
/// dimension operands and `symbol_operands` as symbol operands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRemap {
    pub map: AffineMap,
    pub symbol_operands: Vec<Handle<Value>>,
}

fn dereferences(op: &Operation) -> bool {
    matches!(
        op,
        Operation::Load { .. }
            | Operation::Store { .. }
            | Operation::DmaStart { .. }
            | Operation::DmaWait { .. }
    )
}

/// Checks that every use of `old` among `scope` is a dereferencing memref
/// operand.
pub fn check_memref_uses_replaceable(
    func: &Function,
    old: Handle<Value>,
    scope: &[Handle<Statement>],
) -> Result<(), RewriteError> {
    for &stmt in scope {
        let Some(op) = func.as_op(stmt) else {
            continue;
        };
        let uses = op.operands().into_iter().filter(|&v| v == old).count();
        if uses == 0 {
            continue;
        }
        if !dereferences(op) {
            return Err(RewriteError::NonDereferencingUse {
                memref: old.index(),
                op: op.mnemonic(),
            });
        }
        let slots = op
            .memref_accesses()
            .iter()
            .filter(|(memref, _)| *memref == old)
            .count();
        if slots != uses {
            return Err(RewriteError::NonMemRefOperand {
                memref: old.index(),
                op: op.mnemonic(),
            });
        }
    }
    Ok(())
}

/// Replaces every use of `old` by `new` in the statements dominated by
/// `scope_start`, remapping subscripts through `remap` if given.
///
/// Remapped subscripts are materialized as one `affine_apply` per result,
/// inserted right before the rewritten operation. Uses are validated before
/// anything is changed; on error the function is untouched.
///
/// Returns the number of rewritten memref operands.
pub fn replace_all_memref_uses_with(
    func: &mut Function,
    old: Handle<Value>,
    new: Handle<Value>,
    remap: Option<&IndexRemap>,
    scope_start: Handle<Statement>,
) -> Result<usize, RewriteError> {
    let scope = func.dominated_region(scope_start);
    check_memref_uses_replaceable(func, old, &scope)?;
    if let Some(remap) = remap {
        let rank = func.memref_type(old).map_or(0, |ty| ty.rank());
        if remap.map.num_dims != rank {
            return Err(RewriteError::RemapArity {
                expected: remap.map.num_dims,
                rank,
            });
        }
    }

    let mut replaced = 0;
    for stmt in scope {
        let Some(op) = func.as_op(stmt) else {
            continue;
        };
        let slots: Vec<(usize, Vec<Handle<Value>>)> = op
            .memref_accesses()
            .into_iter()
            .enumerate()
            .filter(|(_, (memref, _))| *memref == old)
            .map(|(slot, (_, indices))| (slot, indices.to_vec()))
            .collect();

        for (slot, indices) in slots {
            let new_indices = match remap {
                Some(remap) => {
                    let mut builder = Builder::before(stmt);
                    let operands: Vec<_> = indices
                        .iter()
                        .chain(&remap.symbol_operands)
                        .copied()
                        .collect();
                    remap
                        .map
                        .results
                        .iter()
                        .map(|result| {
                            let single = AffineMap::new(
                                remap.map.num_dims,
                                remap.map.num_symbols,
                                vec![result.clone()],
                            );
                            builder.affine_apply(func, single, operands.clone())
                        })
                        .collect()
                }
                None => indices,
            };
            if let StatementKind::Op(op) = &mut func.statements[stmt].kind {
                if let Some((memref, indices)) = op.memref_access_mut(slot) {
                    *memref = new;
                    *indices = new_indices;
                    replaced += 1;
                }
            }
        }
    }
    Ok(replaced)
}
