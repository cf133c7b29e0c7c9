//! Memory regions touched by an access across a loop nest.
//!
//! A region is the set of memref elements an access touches when the loops
//! at depth `loop_depth` and deeper run through all their iterations, with
//! the outer induction variables and function symbols held fixed. It is
//! described as a [`FlatAffineConstraints`] whose dimensions are the memref
//! dimensions and whose symbols are those outer values.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dmagen_ir::{
    AffineExpr, AffineMap, Function, Handle, Operation, Statement, Value, ValueDef,
};

use crate::access::classify_access;
use crate::constraints::{BoundDifference, ConstraintError, FlatAffineConstraints};
use crate::loops::{enclosing_loops, induction_vars};

/// Reasons a region cannot be computed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("'{op}' is not a load or store")]
    NotAnAccess { op: &'static str },

    #[error("accessed value {value} is not a memref")]
    NotAMemRef { value: usize },

    #[error("rank-{rank} memref accessed with {found} subscripts")]
    SubscriptCount { rank: usize, found: usize },

    /// An index or bound operand is not built from constants, induction
    /// variables, index arguments, and `affine_apply`.
    #[error("value {value} is not an affine function of loop variables and symbols")]
    NonAffineIndex { value: usize },

    #[error("semi-affine expression `{expr}` is not supported")]
    SemiAffine { expr: String },

    #[error("coefficient overflow while flattening an access")]
    Overflow,

    #[error(transparent)]
    Constraint(#[from] ConstraintError),
}

/// The footprint of one access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemRefRegion {
    pub memref: Handle<Value>,
    /// `true` for a store.
    pub write: bool,
    /// One dimension per memref dimension, one symbol per captured outer
    /// value.
    pub cst: FlatAffineConstraints,
}

impl MemRefRegion {
    pub fn rank(&self) -> usize {
        self.cst.num_dim_ids()
    }

    /// Outer values the region depends on, in symbol column order.
    pub fn symbol_values(&self) -> Vec<Handle<Value>> {
        self.cst.symbol_values().into_iter().flatten().collect()
    }

    /// Constant extent and lower bound of every dimension, or `None` if
    /// some dimension has no constant extent.
    pub fn dim_bounds(&self) -> Option<Vec<BoundDifference>> {
        (0..self.rank())
            .map(|d| self.cst.constant_bound_difference(d))
            .collect()
    }

    /// Number of elements in the bounding box of the region.
    ///
    /// `None` if some dimension has no constant extent; `Some(0)` if some
    /// extent is not positive.
    pub fn constant_size(&self) -> Option<u64> {
        let bounds = self.dim_bounds()?;
        if bounds.iter().any(|b| b.extent <= 0) {
            return Some(0);
        }
        bounds.iter().try_fold(1u64, |acc, b| {
            acc.checked_mul(u64::try_from(b.extent).ok()?)
        })
    }

    /// Per-dimension extents, if all are constant and positive.
    pub fn constant_shape(&self) -> Option<Vec<u64>> {
        self.dim_bounds()?
            .iter()
            .map(|b| u64::try_from(b.extent).ok().filter(|&e| e > 0))
            .collect()
    }
}

/// `Σ coeff · value + constant` over arbitrary SSA values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SparseExpr {
    terms: BTreeMap<Handle<Value>, i64>,
    constant: i64,
}

impl SparseExpr {
    fn constant(value: i64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    fn value(value: Handle<Value>) -> Self {
        Self {
            terms: BTreeMap::from([(value, 1)]),
            constant: 0,
        }
    }

    /// `self += factor * other`.
    fn add_scaled(&mut self, other: &SparseExpr, factor: i64) -> Result<(), RegionError> {
        for (&value, &coeff) in &other.terms {
            let scaled = coeff.checked_mul(factor).ok_or(RegionError::Overflow)?;
            let entry = self.terms.entry(value).or_insert(0);
            *entry = entry.checked_add(scaled).ok_or(RegionError::Overflow)?;
            if *entry == 0 {
                self.terms.remove(&value);
            }
        }
        let scaled = other
            .constant
            .checked_mul(factor)
            .ok_or(RegionError::Overflow)?;
        self.constant = self
            .constant
            .checked_add(scaled)
            .ok_or(RegionError::Overflow)?;
        Ok(())
    }
}

/// Rewrites index values as linear combinations of induction variables and
/// index arguments, looking through `constant` and `affine_apply`.
struct Flattener<'a> {
    func: &'a Function,
    cache: HashMap<Handle<Value>, SparseExpr>,
}

impl<'a> Flattener<'a> {
    fn new(func: &'a Function) -> Self {
        Self {
            func,
            cache: HashMap::new(),
        }
    }

    fn value(&mut self, value: Handle<Value>) -> Result<SparseExpr, RegionError> {
        if let Some(expr) = self.cache.get(&value) {
            return Ok(expr.clone());
        }
        let func = self.func;
        let non_affine = RegionError::NonAffineIndex {
            value: value.index(),
        };
        if !func.value_type(value).is_index() {
            return Err(non_affine);
        }
        let expr = match func.values[value].def {
            ValueDef::Argument(_) | ValueDef::InductionVar(_) => SparseExpr::value(value),
            ValueDef::Result(_) => match func.defining_op(value) {
                Some(Operation::Constant { value, .. }) => SparseExpr::constant(*value),
                Some(Operation::AffineApply { map, operands, .. }) => match map.results.as_slice() {
                    [result] => self.apply(map, result, operands)?,
                    _ => return Err(non_affine),
                },
                _ => return Err(non_affine),
            },
        };
        self.cache.insert(value, expr.clone());
        Ok(expr)
    }

    /// One result of `map` applied to `operands`.
    fn apply(
        &mut self,
        map: &AffineMap,
        result: &AffineExpr,
        operands: &[Handle<Value>],
    ) -> Result<SparseExpr, RegionError> {
        let linear = result
            .flatten(map.num_dims, map.num_symbols)
            .ok_or_else(|| RegionError::SemiAffine {
                expr: result.to_string(),
            })?;
        let mut out = SparseExpr::constant(linear.constant);
        for (&coeff, &operand) in linear.coeffs.iter().zip(operands) {
            if coeff != 0 {
                let operand = self.value(operand)?;
                out.add_scaled(&operand, coeff)?;
            }
        }
        Ok(out)
    }
}

/// Builds a constraint row `scale * expr` over `columns`, offset by the
/// `rank` dimension columns.
fn row(
    rank: usize,
    columns: &[Handle<Value>],
    expr: &SparseExpr,
    scale: i64,
) -> Result<Vec<i64>, RegionError> {
    let mut row = vec![0; rank + columns.len() + 1];
    for (value, &coeff) in &expr.terms {
        let Some(pos) = columns.iter().position(|c| c == value) else {
            return Err(RegionError::NonAffineIndex {
                value: value.index(),
            });
        };
        row[rank + pos] = coeff.checked_mul(scale).ok_or(RegionError::Overflow)?;
    }
    row[rank + columns.len()] = expr
        .constant
        .checked_mul(scale)
        .ok_or(RegionError::Overflow)?;
    Ok(row)
}

/// Computes the region accessed by the load or store `stmt` while the
/// loops at depth `loop_depth` and deeper iterate.
///
/// Induction variables of the outer `loop_depth` loops and index-typed
/// function arguments stay as symbols. Loop steps are ignored, so the region
/// is the bounding box of the iteration space.
pub fn compute_memref_region(
    func: &Function,
    stmt: Handle<Statement>,
    loop_depth: usize,
) -> Result<MemRefRegion, RegionError> {
    let Some(op) = func.as_op(stmt) else {
        return Err(RegionError::NotAnAccess { op: "for" });
    };
    let access = classify_access(op);
    let Some(memref) = access.memref() else {
        return Err(RegionError::NotAnAccess {
            op: op.mnemonic(),
        });
    };
    let indices = access.indices();
    let write = access.is_write();
    let Some(ty) = func.memref_type(memref) else {
        return Err(RegionError::NotAMemRef {
            value: memref.index(),
        });
    };
    let rank = ty.rank();
    if rank != indices.len() {
        return Err(RegionError::SubscriptCount {
            rank,
            found: indices.len(),
        });
    }

    let loops = enclosing_loops(func, stmt);
    let inner_loops = loops.get(loop_depth..).unwrap_or(&[]);
    let eliminated = induction_vars(func, inner_loops);

    let mut flattener = Flattener::new(func);
    let accesses = indices
        .iter()
        .map(|&index| flattener.value(index))
        .collect::<Result<Vec<_>, _>>()?;

    let mut lower_bounds = Vec::new();
    let mut upper_bounds = Vec::new();
    for &lp in inner_loops {
        let Some(for_stmt) = func.as_for(lp) else {
            continue;
        };
        let iv = for_stmt.induction_var;
        for result in &for_stmt.lower.map.results {
            let lb = flattener.apply(&for_stmt.lower.map, result, &for_stmt.lower.operands)?;
            lower_bounds.push((iv, lb));
        }
        for result in &for_stmt.upper.map.results {
            let ub = flattener.apply(&for_stmt.upper.map, result, &for_stmt.upper.operands)?;
            upper_bounds.push((iv, ub));
        }
    }

    let mut used: BTreeSet<Handle<Value>> = BTreeSet::new();
    for expr in accesses
        .iter()
        .chain(lower_bounds.iter().map(|(_, e)| e))
        .chain(upper_bounds.iter().map(|(_, e)| e))
    {
        used.extend(expr.terms.keys().copied());
    }
    let columns: Vec<Handle<Value>> = used
        .into_iter()
        .filter(|v| !eliminated.contains(v))
        .chain(eliminated.iter().copied())
        .collect();

    let mut cst = FlatAffineConstraints::new(rank, 0);
    for &value in &columns {
        cst.add_symbol_id(Some(value));
    }
    let iv_column = |iv: Handle<Value>| {
        rank + columns
            .iter()
            .position(|&c| c == iv)
            .unwrap_or(columns.len())
    };
    let constant_column = rank + columns.len();

    // d_i - access_i == 0
    for (dim, access) in accesses.iter().enumerate() {
        let mut eq = row(rank, &columns, access, -1)?;
        eq[dim] = 1;
        cst.add_equality(eq);
    }
    // iv - lb >= 0
    for (iv, lb) in &lower_bounds {
        let mut ineq = row(rank, &columns, lb, -1)?;
        let col = iv_column(*iv);
        ineq[col] = ineq[col].checked_add(1).ok_or(RegionError::Overflow)?;
        cst.add_inequality(ineq);
    }
    // ub - iv - 1 >= 0
    for (iv, ub) in &upper_bounds {
        let mut ineq = row(rank, &columns, ub, 1)?;
        let col = iv_column(*iv);
        ineq[col] = ineq[col].checked_sub(1).ok_or(RegionError::Overflow)?;
        ineq[constant_column] = ineq[constant_column]
            .checked_sub(1)
            .ok_or(RegionError::Overflow)?;
        cst.add_inequality(ineq);
    }

    for &iv in &eliminated {
        cst.project_out_value(iv)?;
    }
    cst.normalize();
    log::trace!("region of {memref:?} below depth {loop_depth}:\n{cst}");

    Ok(MemRefRegion { memref, write, cst })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmagen_ir::{AffineBound, Builder, MemRefType, Scalar, Type};

    fn memref_arg(f: &mut Function, name: &str, shape: &[u64]) -> Handle<Value> {
        f.add_argument(name, Type::MemRef(MemRefType::new(shape, Scalar::F32, 0)))
    }

    fn single_loop(lower: i64, upper: i64) -> (Function, Handle<Statement>, Handle<Value>) {
        let mut f = Function::new("f");
        let a = memref_arg(&mut f, "A", &[256]);
        let (lp, i) = Builder::at_end(None).for_loop(
            &mut f,
            AffineBound::constant(lower),
            AffineBound::constant(upper),
            1,
        );
        let v = Builder::at_end(Some(lp)).load(&mut f, a, vec![i]);
        let load = f.defining_statement(v).unwrap();
        (f, load, i)
    }

    #[test]
    fn whole_loop_region() {
        let (f, load, _) = single_loop(0, 256);
        let region = compute_memref_region(&f, load, 0).unwrap();
        assert!(!region.write);
        assert_eq!(region.rank(), 1);
        assert!(region.symbol_values().is_empty());
        assert_eq!(region.constant_size(), Some(256));
        assert_eq!(region.constant_shape(), Some(vec![256]));
        let bounds = region.dim_bounds().unwrap();
        assert_eq!(bounds[0].lower_bound, vec![1, 0]);
    }

    #[test]
    fn region_inside_the_loop_is_one_element() {
        let (f, load, i) = single_loop(0, 256);
        let region = compute_memref_region(&f, load, 1).unwrap();
        assert_eq!(region.symbol_values(), vec![i]);
        assert_eq!(region.constant_size(), Some(1));
        // d0 - %i >= 0 read as a lower bound: offset is %i
        assert_eq!(region.dim_bounds().unwrap()[0].lower_bound, vec![1, -1, 0]);
    }

    #[test]
    fn empty_loop_has_zero_size() {
        let (f, load, _) = single_loop(10, 5);
        let region = compute_memref_region(&f, load, 0).unwrap();
        assert_eq!(region.constant_size(), Some(0));
        assert_eq!(region.constant_shape(), None);
    }

    #[test]
    fn tiled_region_keeps_outer_ivs_symbolic() {
        let mut f = Function::new("tiled");
        let a = memref_arg(&mut f, "A", &[64, 64]);
        let tile = |iv| AffineBound {
            map: AffineMap::new(1, 0, vec![AffineExpr::dim(0) + 32]),
            operands: vec![iv],
        };
        let (i_loop, i) = Builder::at_end(None).for_loop(
            &mut f,
            AffineBound::constant(0),
            AffineBound::constant(64),
            32,
        );
        let (j_loop, j) = Builder::at_end(Some(i_loop)).for_loop(
            &mut f,
            AffineBound::constant(0),
            AffineBound::constant(64),
            32,
        );
        let (ii_loop, ii) = Builder::at_end(Some(j_loop)).for_loop(
            &mut f,
            AffineBound::value(i),
            tile(i),
            1,
        );
        let (jj_loop, jj) = Builder::at_end(Some(ii_loop)).for_loop(
            &mut f,
            AffineBound::value(j),
            tile(j),
            1,
        );
        let v = Builder::at_end(Some(jj_loop)).load(&mut f, a, vec![ii, jj]);
        let load = f.defining_statement(v).unwrap();

        let region = compute_memref_region(&f, load, 2).unwrap();
        assert_eq!(region.symbol_values(), vec![i, j]);
        assert_eq!(region.constant_shape(), Some(vec![32, 32]));
        assert_eq!(region.constant_size(), Some(1024));
        let bounds = region.dim_bounds().unwrap();
        assert_eq!(bounds[0].lower_bound, vec![1, 0, -1, 0, 0]);
        assert_eq!(bounds[1].lower_bound, vec![0, 1, 0, -1, 0]);

        // Steps are ignored: %i ranges over [0, 63], so %ii reaches 63 + 31.
        let whole = compute_memref_region(&f, load, 0).unwrap();
        assert!(whole.symbol_values().is_empty());
        assert_eq!(whole.constant_shape(), Some(vec![95, 95]));
    }

    #[test]
    fn looks_through_affine_apply_and_constants() {
        let mut f = Function::new("f");
        let a = memref_arg(&mut f, "A", &[16, 4]);
        let (lp, i) = Builder::at_end(None).for_loop(
            &mut f,
            AffineBound::constant(0),
            AffineBound::constant(10),
            1,
        );
        let mut body = Builder::at_end(Some(lp));
        let shifted = body.affine_apply(
            &mut f,
            AffineMap::new(1, 0, vec![AffineExpr::dim(0) + 3]),
            vec![i],
        );
        let c2 = body.constant_index(&mut f, 2);
        let v = body.load(&mut f, a, vec![shifted, c2]);
        let load = f.defining_statement(v).unwrap();

        let region = compute_memref_region(&f, load, 0).unwrap();
        assert_eq!(region.constant_shape(), Some(vec![10, 1]));
        let bounds = region.dim_bounds().unwrap();
        assert_eq!(bounds[0].lower_bound, vec![1, 0, -3]);
        assert_eq!(bounds[1].lower_bound, vec![0, 1, -2]);
    }

    #[test]
    fn symbolic_trip_count_has_no_constant_size() {
        let mut f = Function::new("f");
        let a = memref_arg(&mut f, "A", &[256]);
        let n = f.add_argument("n", Type::Index);
        let (lp, i) = Builder::at_end(None).for_loop(
            &mut f,
            AffineBound::constant(0),
            AffineBound::value(n),
            1,
        );
        let v = Builder::at_end(Some(lp)).load(&mut f, a, vec![i]);
        let load = f.defining_statement(v).unwrap();

        let region = compute_memref_region(&f, load, 0).unwrap();
        assert_eq!(region.symbol_values(), vec![n]);
        assert_eq!(region.constant_size(), None);
    }

    #[test]
    fn store_regions_are_writes() {
        let mut f = Function::new("f");
        let a = memref_arg(&mut f, "A", &[8]);
        let mut b = Builder::at_end(None);
        let c = b.constant_index(&mut f, 5);
        let v = b.load(&mut f, a, vec![c]);
        let store = b.store(&mut f, v, a, vec![c]);
        let region = compute_memref_region(&f, store, 0).unwrap();
        assert!(region.write);
        assert_eq!(region.constant_size(), Some(1));
        assert_eq!(region.dim_bounds().unwrap()[0].lower_bound, vec![1, -5]);
    }

    #[test]
    fn rejects_semi_affine_and_non_accesses() {
        let mut f = Function::new("f");
        let a = memref_arg(&mut f, "A", &[8]);
        let (lp, i) = Builder::at_end(None).for_loop(
            &mut f,
            AffineBound::constant(0),
            AffineBound::constant(32),
            1,
        );
        let mut body = Builder::at_end(Some(lp));
        let wrapped = body.affine_apply(
            &mut f,
            AffineMap::new(1, 0, vec![AffineExpr::dim(0).modulo(8)]),
            vec![i],
        );
        let v = body.load(&mut f, a, vec![wrapped]);
        let load = f.defining_statement(v).unwrap();
        assert!(matches!(
            compute_memref_region(&f, load, 0),
            Err(RegionError::SemiAffine { .. })
        ));
        let apply = f.defining_statement(wrapped).unwrap();
        assert_eq!(
            compute_memref_region(&f, apply, 0),
            Err(RegionError::NotAnAccess { op: "affine_apply" })
        );
        assert_eq!(
            compute_memref_region(&f, lp, 0),
            Err(RegionError::NotAnAccess { op: "for" })
        );
    }

    #[test]
    fn rejects_data_dependent_index() {
        let mut f = Function::new("f");
        let a = memref_arg(&mut f, "A", &[8]);
        let idx = f.add_argument(
            "idx",
            Type::MemRef(MemRefType::new(&[1], Scalar::I64, 0)),
        );
        let mut b = Builder::at_end(None);
        let c = b.constant_index(&mut f, 0);
        let loaded = b.load(&mut f, idx, vec![c]);
        let v = b.load(&mut f, a, vec![loaded]);
        let load = f.defining_statement(v).unwrap();
        assert_eq!(
            compute_memref_region(&f, load, 0),
            Err(RegionError::NonAffineIndex {
                value: loaded.index()
            })
        );
    }
}
