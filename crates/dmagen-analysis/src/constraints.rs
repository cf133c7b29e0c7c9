//! Flat systems of affine equalities and inequalities.
//!
//! A system holds rows of the form `coeffs · ids + constant == 0` and
//! `coeffs · ids + constant >= 0`. Identifier columns are split into
//! dimensions (first) and symbols (after); symbols may carry the SSA value
//! they stand for. The constant is the last column of every row.

use std::collections::HashMap;
use std::fmt;

use dmagen_ir::{Handle, Value};

/// Errors while manipulating a constraint system.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConstraintError {
    /// Coefficient arithmetic left the `i64` range.
    #[error("coefficient overflow while eliminating column {column}")]
    Overflow { column: usize },

    #[error("column {column} is out of range for {num_ids} identifiers")]
    BadColumn { column: usize, num_ids: usize },
}

/// Extent of one dimension together with the inequality that bounds it
/// from below.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundDifference {
    /// `upper - lower + 1`, the same for every value of the symbols.
    pub extent: i64,
    /// Row with coefficient `+1` at the dimension's column:
    /// `d + rest · ids + constant >= 0`, i.e. `d >= -(rest · ids) - constant`.
    pub lower_bound: Vec<i64>,
}

/// A conjunction of affine equalities and inequalities over integer ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlatAffineConstraints {
    num_dims: usize,
    num_symbols: usize,
    /// Value attached to each identifier column.
    values: Vec<Option<Handle<Value>>>,
    equalities: Vec<Vec<i64>>,
    inequalities: Vec<Vec<i64>>,
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    i64::try_from(a).unwrap_or(i64::MAX)
}

fn lcm(a: i64, b: i64) -> Option<i64> {
    let g = gcd(a, b);
    if g == 0 {
        return Some(0);
    }
    (a / g).checked_mul(b)?.checked_abs()
}

/// `fa * a + fb * b`, column by column.
fn combine(a: &[i64], fa: i64, b: &[i64], fb: i64) -> Option<Vec<i64>> {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| x.checked_mul(fa)?.checked_add(y.checked_mul(fb)?))
        .collect()
}

impl FlatAffineConstraints {
    /// An empty (universe) system over the given identifiers.
    pub fn new(num_dims: usize, num_symbols: usize) -> Self {
        Self {
            num_dims,
            num_symbols,
            values: vec![None; num_dims + num_symbols],
            equalities: Vec::new(),
            inequalities: Vec::new(),
        }
    }

    pub fn num_dim_ids(&self) -> usize {
        self.num_dims
    }

    pub fn num_symbol_ids(&self) -> usize {
        self.num_symbols
    }

    pub fn num_ids(&self) -> usize {
        self.num_dims + self.num_symbols
    }

    /// Row length: every identifier plus the constant.
    pub fn num_cols(&self) -> usize {
        self.num_ids() + 1
    }

    pub fn equalities(&self) -> &[Vec<i64>] {
        &self.equalities
    }

    pub fn inequalities(&self) -> &[Vec<i64>] {
        &self.inequalities
    }

    /// Appends a symbol column, optionally bound to a value, and returns its
    /// position.
    pub fn add_symbol_id(&mut self, value: Option<Handle<Value>>) -> usize {
        let pos = self.num_ids();
        self.insert_column(pos);
        self.values.insert(pos, value);
        self.num_symbols += 1;
        pos
    }

    /// Inserts a dimension column at `pos` (at most `num_dim_ids`).
    pub fn add_dim_id(&mut self, pos: usize) {
        assert!(pos <= self.num_dims, "dimension position {pos} out of range");
        self.insert_column(pos);
        self.values.insert(pos, None);
        self.num_dims += 1;
    }

    fn insert_column(&mut self, pos: usize) {
        for row in self.equalities.iter_mut().chain(&mut self.inequalities) {
            row.insert(pos, 0);
        }
    }

    /// The value attached to identifier `pos`, if any.
    pub fn id_value(&self, pos: usize) -> Option<Handle<Value>> {
        self.values.get(pos).copied().flatten()
    }

    /// Values attached to the symbol columns, in column order.
    pub fn symbol_values(&self) -> Vec<Option<Handle<Value>>> {
        self.values[self.num_dims..].to_vec()
    }

    /// Column of the identifier bound to `value`.
    pub fn find_id(&self, value: Handle<Value>) -> Option<usize> {
        self.values.iter().position(|v| *v == Some(value))
    }

    /// Adds `row · ids + constant == 0`.
    pub fn add_equality(&mut self, row: Vec<i64>) {
        assert_eq!(row.len(), self.num_cols(), "equality row width");
        self.equalities.push(row);
    }

    /// Adds `row · ids + constant >= 0`.
    pub fn add_inequality(&mut self, row: Vec<i64>) {
        assert_eq!(row.len(), self.num_cols(), "inequality row width");
        self.inequalities.push(row);
    }

    /// Adds `lower <= id <= upper`.
    pub fn add_constant_bounds(&mut self, pos: usize, lower: i64, upper: i64) {
        let cols = self.num_cols();
        let mut lb = vec![0; cols];
        lb[pos] = 1;
        lb[cols - 1] = -lower;
        let mut ub = vec![0; cols];
        ub[pos] = -1;
        ub[cols - 1] = upper;
        self.add_inequality(lb);
        self.add_inequality(ub);
    }

    /// Divides every row by the GCD of its identifier coefficients,
    /// flooring inequality constants, then drops duplicate and trivially
    /// true rows. For inequalities with identical coefficients only the
    /// tightest constant survives.
    pub fn normalize(&mut self) {
        let n = self.num_ids();
        for row in &mut self.inequalities {
            let g = row[..n].iter().fold(0, |g, &c| gcd(g, c));
            if g > 1 {
                for c in &mut row[..n] {
                    *c /= g;
                }
                row[n] = row[n].div_euclid(g);
            }
        }
        for row in &mut self.equalities {
            let g = row[..n].iter().fold(0, |g, &c| gcd(g, c));
            if g > 1 && row[n] % g == 0 {
                for c in row.iter_mut() {
                    *c /= g;
                }
            }
            if row[..n].iter().find(|&&c| c != 0).is_some_and(|&c| c < 0) {
                for c in row.iter_mut() {
                    *c = -*c;
                }
            }
        }

        let mut tightest: HashMap<Vec<i64>, usize> = HashMap::new();
        let mut kept: Vec<Vec<i64>> = Vec::new();
        for row in std::mem::take(&mut self.inequalities) {
            if row[..n].iter().all(|&c| c == 0) && row[n] >= 0 {
                continue;
            }
            match tightest.get(&row[..n]) {
                Some(&i) => kept[i][n] = kept[i][n].min(row[n]),
                None => {
                    tightest.insert(row[..n].to_vec(), kept.len());
                    kept.push(row);
                }
            }
        }
        self.inequalities = kept;

        let mut seen = Vec::new();
        self.equalities.retain(|row| {
            if row.iter().all(|&c| c == 0) || seen.contains(row) {
                return false;
            }
            seen.push(row.clone());
            true
        });
    }

    /// `true` if some row is a contradiction on its own, such as `-1 >= 0`
    /// or `2 == 0`, or an equality whose coefficient GCD does not divide its
    /// constant.
    pub fn has_trivial_contradiction(&self) -> bool {
        let n = self.num_ids();
        let bad_eq = self.equalities.iter().any(|row| {
            let g = row[..n].iter().fold(0, |g, &c| gcd(g, c));
            if g == 0 {
                row[n] != 0
            } else {
                row[n] % g != 0
            }
        });
        let bad_ineq = self
            .inequalities
            .iter()
            .any(|row| row[..n].iter().all(|&c| c == 0) && row[n] < 0);
        bad_eq || bad_ineq
    }

    /// Eliminates identifier `pos` and removes its column.
    ///
    /// Uses Gaussian elimination when an equality mentions the identifier,
    /// Fourier-Motzkin elimination otherwise.
    pub fn project_out(&mut self, pos: usize) -> Result<(), ConstraintError> {
        if pos >= self.num_ids() {
            return Err(ConstraintError::BadColumn {
                column: pos,
                num_ids: self.num_ids(),
            });
        }
        let overflow = ConstraintError::Overflow { column: pos };

        if let Some(pivot) = self.equalities.iter().position(|row| row[pos] != 0) {
            let eq = self.equalities.remove(pivot);
            let a = eq[pos];
            for row in self.equalities.iter_mut().chain(&mut self.inequalities) {
                let b = row[pos];
                if b == 0 {
                    continue;
                }
                let l = lcm(a, b).ok_or(overflow.clone())?;
                let row_factor = l / b.abs();
                let eq_factor = b
                    .checked_mul(row_factor)
                    .ok_or(overflow.clone())?
                    / a;
                *row = combine(row, row_factor, &eq, -eq_factor).ok_or(overflow.clone())?;
            }
        } else {
            let (mut lower, mut upper, mut rest) = (Vec::new(), Vec::new(), Vec::new());
            for row in std::mem::take(&mut self.inequalities) {
                match row[pos].signum() {
                    1 => lower.push(row),
                    -1 => upper.push(row),
                    _ => rest.push(row),
                }
            }
            for lb in &lower {
                for ub in &upper {
                    let (p, q) = (lb[pos], -ub[pos]);
                    let l = lcm(p, q).ok_or(overflow.clone())?;
                    rest.push(combine(lb, l / p, ub, l / q).ok_or(overflow.clone())?);
                }
            }
            self.inequalities = rest;
        }

        for row in self.equalities.iter_mut().chain(&mut self.inequalities) {
            row.remove(pos);
        }
        self.values.remove(pos);
        if pos < self.num_dims {
            self.num_dims -= 1;
        } else {
            self.num_symbols -= 1;
        }
        self.normalize();
        Ok(())
    }

    /// Projects out the identifier bound to `value`, if present.
    pub fn project_out_value(&mut self, value: Handle<Value>) -> Result<(), ConstraintError> {
        match self.find_id(value) {
            Some(pos) => self.project_out(pos),
            None => Ok(()),
        }
    }

    /// Finds the smallest constant extent of dimension `pos` over all
    /// lower/upper bound pairs that differ only in their constants.
    ///
    /// Bounds that mention another dimension are ignored. An equality with
    /// a unit coefficient at `pos` pins the dimension to extent 1.
    pub fn constant_bound_difference(&self, pos: usize) -> Option<BoundDifference> {
        if pos >= self.num_dims {
            return None;
        }
        let n = self.num_ids();
        let free_of_other_dims =
            |row: &[i64]| (0..self.num_dims).all(|d| d == pos || row[d] == 0);

        for eq in &self.equalities {
            if eq[pos].abs() == 1 && free_of_other_dims(eq) {
                let lower_bound = if eq[pos] == 1 {
                    eq.clone()
                } else {
                    eq.iter().map(|c| -c).collect()
                };
                return Some(BoundDifference {
                    extent: 1,
                    lower_bound,
                });
            }
        }

        let bounds = |coeff: i64| {
            self.inequalities
                .iter()
                .filter(move |row| row[pos] == coeff && free_of_other_dims(row))
        };
        let mut best: Option<BoundDifference> = None;
        for lb in bounds(1) {
            for ub in bounds(-1) {
                if (0..n).any(|j| j != pos && ub[j] != -lb[j]) {
                    continue;
                }
                let Some(extent) = ub[n]
                    .checked_add(lb[n])
                    .and_then(|e| e.checked_add(1))
                else {
                    continue;
                };
                if best.as_ref().map_or(true, |b| extent < b.extent) {
                    best = Some(BoundDifference {
                        extent,
                        lower_bound: lb.clone(),
                    });
                }
            }
        }
        best
    }

    /// Constant lower and upper bound of identifier `pos`, when some
    /// inequality bounds it by a constant alone.
    pub fn constant_bounds(&self, pos: usize) -> (Option<i64>, Option<i64>) {
        let n = self.num_ids();
        let only_pos = |row: &&Vec<i64>| (0..n).all(|j| j == pos || row[j] == 0);
        let mut lower: Option<i64> = None;
        let mut upper: Option<i64> = None;
        for row in self.inequalities.iter().filter(only_pos) {
            let c = row[pos];
            if c > 0 {
                // c * x + k >= 0  =>  x >= ceil(-k / c)
                let bound = (-row[n]).div_euclid(c) + i64::from((-row[n]).rem_euclid(c) != 0);
                lower = Some(lower.map_or(bound, |l| l.max(bound)));
            } else if c < 0 {
                // c * x + k >= 0  =>  x <= floor(k / -c)
                let bound = row[n].div_euclid(-c);
                upper = Some(upper.map_or(bound, |u| u.min(bound)));
            }
        }
        for row in self.equalities.iter().filter(only_pos) {
            let c = row[pos];
            if c != 0 && row[n] % c == 0 {
                let value = -row[n] / c;
                lower = Some(value);
                upper = Some(value);
            }
        }
        (lower, upper)
    }

    fn fmt_row(&self, f: &mut fmt::Formatter<'_>, row: &[i64], rel: &str) -> fmt::Result {
        let n = self.num_ids();
        let mut first = true;
        for (j, &c) in row[..n].iter().enumerate() {
            if c == 0 {
                continue;
            }
            let id = if j < self.num_dims {
                format!("d{j}")
            } else {
                format!("s{}", j - self.num_dims)
            };
            let sign = if c < 0 { "-" } else { "+" };
            if first {
                if c < 0 {
                    f.write_str("-")?;
                }
            } else {
                write!(f, " {sign} ")?;
            }
            if c.abs() != 1 {
                write!(f, "{} * ", c.abs())?;
            }
            f.write_str(&id)?;
            first = false;
        }
        let k = row[n];
        if first {
            write!(f, "{k}")?;
        } else if k != 0 {
            write!(f, " {} {}", if k < 0 { "-" } else { "+" }, k.abs())?;
        }
        writeln!(f, " {rel} 0")
    }
}

impl fmt::Display for FlatAffineConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "constraints ({} dims, {} symbols, {} eq, {} ineq)",
            self.num_dims,
            self.num_symbols,
            self.equalities.len(),
            self.inequalities.len()
        )?;
        for row in &self.equalities {
            self.fmt_row(f, row, "==")?;
        }
        for row in &self.inequalities {
            self.fmt_row(f, row, ">=")?;
        }
        Ok(())
    }
}
