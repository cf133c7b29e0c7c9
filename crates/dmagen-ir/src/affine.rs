//! Affine expressions, affine maps, and their flattened linear form.
//!
//! Expressions are kept in a lightly canonical form: constants are folded
//! eagerly and sit on the right-hand side of commutative operators, so
//! `2 + d0` and `d0 + 2` build the same tree.

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Binary operators allowed inside an affine expression.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AffineBinaryOp {
    Add,
    Mul,
    Mod,
    FloorDiv,
    CeilDiv,
}

impl AffineBinaryOp {
    fn keyword(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Mul => "*",
            Self::Mod => "mod",
            Self::FloorDiv => "floordiv",
            Self::CeilDiv => "ceildiv",
        }
    }
}

/// An affine (or semi-affine) expression over dimension and symbol
/// identifiers.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum AffineExpr {
    /// Dimension identifier `d<N>`.
    Dim(usize),
    /// Symbol identifier `s<N>`.
    Symbol(usize),
    Constant(i64),
    Binary {
        op: AffineBinaryOp,
        lhs: Box<AffineExpr>,
        rhs: Box<AffineExpr>,
    },
}

fn floor_div(lhs: i64, rhs: i64) -> i64 {
    let q = lhs / rhs;
    if lhs % rhs != 0 && ((lhs < 0) != (rhs < 0)) {
        q - 1
    } else {
        q
    }
}

fn ceil_div(lhs: i64, rhs: i64) -> i64 {
    let q = lhs / rhs;
    if lhs % rhs != 0 && ((lhs < 0) == (rhs < 0)) {
        q + 1
    } else {
        q
    }
}

fn fold(op: AffineBinaryOp, lhs: i64, rhs: i64) -> Option<i64> {
    match op {
        AffineBinaryOp::Add => lhs.checked_add(rhs),
        AffineBinaryOp::Mul => lhs.checked_mul(rhs),
        AffineBinaryOp::Mod if rhs > 0 => Some(lhs.rem_euclid(rhs)),
        AffineBinaryOp::FloorDiv if rhs != 0 => Some(floor_div(lhs, rhs)),
        AffineBinaryOp::CeilDiv if rhs != 0 => Some(ceil_div(lhs, rhs)),
        _ => None,
    }
}

impl AffineExpr {
    pub fn dim(pos: usize) -> Self {
        Self::Dim(pos)
    }

    pub fn symbol(pos: usize) -> Self {
        Self::Symbol(pos)
    }

    pub fn constant(value: i64) -> Self {
        Self::Constant(value)
    }

    /// Returns the value if this expression is a constant.
    pub fn as_constant(&self) -> Option<i64> {
        match *self {
            Self::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Builds `lhs op rhs`, folding and canonicalizing where possible.
    pub fn binary(op: AffineBinaryOp, lhs: AffineExpr, rhs: AffineExpr) -> Self {
        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            if let Some(folded) = fold(op, l, r) {
                return Self::Constant(folded);
            }
        }

        let commutative = matches!(op, AffineBinaryOp::Add | AffineBinaryOp::Mul);
        let (lhs, rhs) = if commutative && lhs.as_constant().is_some() {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };

        match (op, rhs.as_constant()) {
            (AffineBinaryOp::Add, Some(0)) => return lhs,
            (AffineBinaryOp::Mul, Some(1)) => return lhs,
            (AffineBinaryOp::Mul, Some(0)) => return Self::Constant(0),
            (AffineBinaryOp::FloorDiv | AffineBinaryOp::CeilDiv, Some(1)) => return lhs,
            (AffineBinaryOp::Mod, Some(1)) => return Self::Constant(0),
            _ => {}
        }

        // Re-associate `(x + c1) + c2` and `(x * c1) * c2`.
        if let (Some(c2), Self::Binary { op: inner, lhs: x, rhs: c1 }) = (rhs.as_constant(), &lhs)
        {
            if *inner == op && commutative {
                if let Some(folded) = c1.as_constant().and_then(|c1| fold(op, c1, c2)) {
                    return Self::binary(op, (**x).clone(), Self::Constant(folded));
                }
            }
        }

        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn modulo(self, rhs: i64) -> Self {
        Self::binary(AffineBinaryOp::Mod, self, Self::Constant(rhs))
    }

    pub fn floor_div(self, rhs: i64) -> Self {
        Self::binary(AffineBinaryOp::FloorDiv, self, Self::Constant(rhs))
    }

    pub fn ceil_div(self, rhs: i64) -> Self {
        Self::binary(AffineBinaryOp::CeilDiv, self, Self::Constant(rhs))
    }

    /// Evaluates the expression for concrete dimension and symbol values.
    ///
    /// Returns `None` on an out-of-range identifier, division by zero, or
    /// overflow.
    pub fn eval(&self, dims: &[i64], symbols: &[i64]) -> Option<i64> {
        match self {
            Self::Dim(pos) => dims.get(*pos).copied(),
            Self::Symbol(pos) => symbols.get(*pos).copied(),
            Self::Constant(c) => Some(*c),
            Self::Binary { op, lhs, rhs } => {
                fold(*op, lhs.eval(dims, symbols)?, rhs.eval(dims, symbols)?)
            }
        }
    }

    /// Substitutes every `d<i>` with `dims[i]` and every `s<j>` with
    /// `symbols[j]`, re-simplifying along the way.
    ///
    /// Identifiers without a replacement are left untouched.
    pub fn replace(&self, dims: &[AffineExpr], symbols: &[AffineExpr]) -> Self {
        match self {
            Self::Dim(pos) => dims.get(*pos).cloned().unwrap_or_else(|| self.clone()),
            Self::Symbol(pos) => symbols.get(*pos).cloned().unwrap_or_else(|| self.clone()),
            Self::Constant(_) => self.clone(),
            Self::Binary { op, lhs, rhs } => {
                Self::binary(*op, lhs.replace(dims, symbols), rhs.replace(dims, symbols))
            }
        }
    }

    /// Returns `true` if the expression contains no `mod`, `floordiv`,
    /// `ceildiv`, or non-constant product.
    pub fn is_pure_affine(&self) -> bool {
        match self {
            Self::Dim(_) | Self::Symbol(_) | Self::Constant(_) => true,
            Self::Binary { op, lhs, rhs } => match op {
                AffineBinaryOp::Add => lhs.is_pure_affine() && rhs.is_pure_affine(),
                AffineBinaryOp::Mul => {
                    (lhs.as_constant().is_some() || rhs.as_constant().is_some())
                        && lhs.is_pure_affine()
                        && rhs.is_pure_affine()
                }
                _ => false,
            },
        }
    }

    /// Flattens the expression into `sum(coeff * id) + constant`, with
    /// dimensions in columns `0..num_dims` followed by symbols.
    ///
    /// Returns `None` for semi-affine expressions and out-of-range
    /// identifiers.
    pub fn flatten(&self, num_dims: usize, num_symbols: usize) -> Option<LinearExpr> {
        let width = num_dims + num_symbols;
        match self {
            Self::Dim(pos) if *pos < num_dims => Some(LinearExpr::unit(width, *pos)),
            Self::Symbol(pos) if *pos < num_symbols => {
                Some(LinearExpr::unit(width, num_dims + pos))
            }
            Self::Dim(_) | Self::Symbol(_) => None,
            Self::Constant(c) => Some(LinearExpr::constant(width, *c)),
            Self::Binary { op, lhs, rhs } => {
                let lhs = lhs.flatten(num_dims, num_symbols)?;
                let rhs = rhs.flatten(num_dims, num_symbols)?;
                match op {
                    AffineBinaryOp::Add => lhs.checked_add(&rhs),
                    AffineBinaryOp::Mul => match (lhs.as_constant(), rhs.as_constant()) {
                        (_, Some(c)) => lhs.checked_scale(c),
                        (Some(c), None) => rhs.checked_scale(c),
                        (None, None) => None,
                    },
                    _ => {
                        let folded = fold(*op, lhs.as_constant()?, rhs.as_constant()?)?;
                        Some(LinearExpr::constant(width, folded))
                    }
                }
            }
        }
    }
}

impl From<i64> for AffineExpr {
    fn from(value: i64) -> Self {
        Self::Constant(value)
    }
}

impl Add for AffineExpr {
    type Output = AffineExpr;

    fn add(self, rhs: AffineExpr) -> AffineExpr {
        AffineExpr::binary(AffineBinaryOp::Add, self, rhs)
    }
}

impl Add<i64> for AffineExpr {
    type Output = AffineExpr;

    fn add(self, rhs: i64) -> AffineExpr {
        self + AffineExpr::Constant(rhs)
    }
}

impl Mul for AffineExpr {
    type Output = AffineExpr;

    fn mul(self, rhs: AffineExpr) -> AffineExpr {
        AffineExpr::binary(AffineBinaryOp::Mul, self, rhs)
    }
}

impl Mul<i64> for AffineExpr {
    type Output = AffineExpr;

    fn mul(self, rhs: i64) -> AffineExpr {
        self * AffineExpr::Constant(rhs)
    }
}

impl Neg for AffineExpr {
    type Output = AffineExpr;

    fn neg(self) -> AffineExpr {
        self * -1
    }
}

impl Sub for AffineExpr {
    type Output = AffineExpr;

    fn sub(self, rhs: AffineExpr) -> AffineExpr {
        self + (-rhs)
    }
}

impl Sub<i64> for AffineExpr {
    type Output = AffineExpr;

    fn sub(self, rhs: i64) -> AffineExpr {
        self + AffineExpr::Constant(rhs).neg()
    }
}

impl AffineExpr {
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parens: bool) -> fmt::Result {
        if parens {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }

    fn is_add(&self) -> bool {
        matches!(
            self,
            Self::Binary {
                op: AffineBinaryOp::Add,
                ..
            }
        )
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dim(pos) => write!(f, "d{pos}"),
            Self::Symbol(pos) => write!(f, "s{pos}"),
            Self::Constant(c) => write!(f, "{c}"),
            Self::Binary {
                op: AffineBinaryOp::Add,
                lhs,
                rhs,
            } => {
                write!(f, "{lhs}")?;
                if let Some(c) = rhs.as_constant() {
                    if c < 0 {
                        return write!(f, " - {}", c.unsigned_abs());
                    }
                }
                if let Self::Binary {
                    op: AffineBinaryOp::Mul,
                    lhs: x,
                    rhs: scale,
                } = rhs.as_ref()
                {
                    match scale.as_constant() {
                        Some(-1) => {
                            f.write_str(" - ")?;
                            return x.fmt_operand(f, x.is_add());
                        }
                        Some(c) if c < 0 => {
                            f.write_str(" - ")?;
                            x.fmt_operand(f, x.is_add())?;
                            return write!(f, " * {}", c.unsigned_abs());
                        }
                        _ => {}
                    }
                }
                f.write_str(" + ")?;
                rhs.fmt_operand(f, rhs.is_add())
            }
            Self::Binary { op, lhs, rhs } => {
                lhs.fmt_operand(f, lhs.is_add())?;
                write!(f, " {} ", op.keyword())?;
                rhs.fmt_operand(f, matches!(rhs.as_ref(), Self::Binary { .. }))
            }
        }
    }
}

/// A flattened affine expression: `coeffs · ids + constant`.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct LinearExpr {
    pub coeffs: Vec<i64>,
    pub constant: i64,
}

impl LinearExpr {
    pub fn constant(width: usize, value: i64) -> Self {
        Self {
            coeffs: vec![0; width],
            constant: value,
        }
    }

    /// The expression consisting of the single identifier at `pos`.
    pub fn unit(width: usize, pos: usize) -> Self {
        let mut expr = Self::constant(width, 0);
        expr.coeffs[pos] = 1;
        expr
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.coeffs
            .iter()
            .all(|&c| c == 0)
            .then_some(self.constant)
    }

    pub fn checked_add(&self, other: &LinearExpr) -> Option<LinearExpr> {
        if self.coeffs.len() != other.coeffs.len() {
            return None;
        }
        let coeffs = self
            .coeffs
            .iter()
            .zip(&other.coeffs)
            .map(|(a, b)| a.checked_add(*b))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            coeffs,
            constant: self.constant.checked_add(other.constant)?,
        })
    }

    pub fn checked_scale(&self, factor: i64) -> Option<LinearExpr> {
        let coeffs = self
            .coeffs
            .iter()
            .map(|c| c.checked_mul(factor))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            coeffs,
            constant: self.constant.checked_mul(factor)?,
        })
    }

    /// Rebuilds a tree expression; columns below `num_dims` become
    /// dimensions and the rest become symbols.
    pub fn to_expr(&self, num_dims: usize) -> AffineExpr {
        let mut expr: Option<AffineExpr> = None;
        for (pos, &coeff) in self.coeffs.iter().enumerate() {
            if coeff == 0 {
                continue;
            }
            let id = if pos < num_dims {
                AffineExpr::dim(pos)
            } else {
                AffineExpr::symbol(pos - num_dims)
            };
            let term = id * coeff;
            expr = Some(match expr {
                Some(acc) => acc + term,
                None => term,
            });
        }
        match expr {
            Some(acc) => acc + self.constant,
            None => AffineExpr::constant(self.constant),
        }
    }
}

/// A multi-result affine function `(d0, ..)[s0, ..] -> (e0, ..)`.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct AffineMap {
    pub num_dims: usize,
    pub num_symbols: usize,
    pub results: Vec<AffineExpr>,
}

impl AffineMap {
    pub fn new(num_dims: usize, num_symbols: usize, results: Vec<AffineExpr>) -> Self {
        Self {
            num_dims,
            num_symbols,
            results,
        }
    }

    /// `() -> (value)`.
    pub fn constant(value: i64) -> Self {
        Self::new(0, 0, vec![AffineExpr::constant(value)])
    }

    /// `(d0, .., d<n-1>) -> (d0, .., d<n-1>)`.
    pub fn identity(num_dims: usize) -> Self {
        Self::new(num_dims, 0, (0..num_dims).map(AffineExpr::dim).collect())
    }

    pub fn num_inputs(&self) -> usize {
        self.num_dims + self.num_symbols
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    /// Returns the value of a single-result constant map.
    pub fn as_single_constant(&self) -> Option<i64> {
        match self.results.as_slice() {
            [only] => only.as_constant(),
            _ => None,
        }
    }

    /// Evaluates every result, with inputs laid out dims-then-symbols.
    pub fn eval(&self, inputs: &[i64]) -> Option<Vec<i64>> {
        if inputs.len() != self.num_inputs() {
            return None;
        }
        let (dims, symbols) = inputs.split_at(self.num_dims);
        self.results.iter().map(|e| e.eval(dims, symbols)).collect()
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for i in 0..self.num_dims {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "d{i}")?;
        }
        f.write_str(")")?;
        if self.num_symbols > 0 {
            f.write_str("[")?;
            for i in 0..self.num_symbols {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "s{i}")?;
            }
            f.write_str("]")?;
        }
        f.write_str(" -> (")?;
        for (i, result) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{result}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(i: usize) -> AffineExpr {
        AffineExpr::dim(i)
    }

    #[test]
    fn constants_fold_eagerly() {
        let e = AffineExpr::constant(3) + 4;
        assert_eq!(e, AffineExpr::Constant(7));
        assert_eq!((AffineExpr::constant(-7)).floor_div(2), AffineExpr::Constant(-4));
        assert_eq!((AffineExpr::constant(-7)).ceil_div(2), AffineExpr::Constant(-3));
        assert_eq!((AffineExpr::constant(-7)).modulo(3), AffineExpr::Constant(2));
    }

    #[test]
    fn constants_move_to_the_right() {
        let lhs = AffineExpr::constant(2) + d(0);
        let rhs = d(0) + 2;
        assert_eq!(lhs, rhs);
        assert_eq!((d(0) + 2) + 3, d(0) + 5);
        assert_eq!((d(0) * 2) * 3, d(0) * 6);
    }

    #[test]
    fn identities_simplify() {
        assert_eq!(d(1) + 0, d(1));
        assert_eq!(d(1) * 1, d(1));
        assert_eq!(d(1) * 0, AffineExpr::Constant(0));
        assert_eq!(d(1).floor_div(1), d(1));
    }

    #[test]
    fn display_uses_subtraction() {
        assert_eq!((d(0) - 64).to_string(), "d0 - 64");
        assert_eq!((d(0) - AffineExpr::symbol(1)).to_string(), "d0 - s1");
        assert_eq!((d(0) - d(1) * 4).to_string(), "d0 - d1 * 4");
        assert_eq!((d(0) + d(1)).modulo(8).to_string(), "(d0 + d1) mod 8");
    }

    #[test]
    fn eval_and_replace() {
        let e = d(0) * 4 + AffineExpr::symbol(0) - 1;
        assert_eq!(e.eval(&[3], &[10]), Some(21));
        let replaced = e.replace(&[AffineExpr::constant(2)], &[]);
        assert_eq!(replaced, AffineExpr::symbol(0) + 7);
    }

    #[test]
    fn flatten_linear_and_reject_semi_affine() {
        let e = d(0) * 3 - AffineExpr::symbol(0) + 5;
        let flat = e.flatten(1, 1).unwrap();
        assert_eq!(flat.coeffs, vec![3, -1]);
        assert_eq!(flat.constant, 5);
        assert!(d(0).modulo(4).flatten(1, 0).is_none());
        assert!((d(0) * d(0)).flatten(1, 0).is_none());
        assert!(!d(0).floor_div(2).is_pure_affine());
    }

    #[test]
    fn linear_expr_round_trips_to_tree() {
        let flat = LinearExpr {
            coeffs: vec![1, 0, -2],
            constant: 3,
        };
        let e = flat.to_expr(1);
        assert_eq!(e.flatten(1, 2).unwrap(), flat);
        assert_eq!(e.to_string(), "d0 - s1 * 2 + 3");
    }

    #[test]
    fn map_display_and_eval() {
        let map = AffineMap::new(1, 1, vec![d(0) + AffineExpr::symbol(0), d(0) * 2]);
        assert_eq!(map.to_string(), "(d0)[s0] -> (d0 + s0, d0 * 2)");
        assert_eq!(map.eval(&[5, 1]), Some(vec![6, 10]));
        assert_eq!(AffineMap::constant(0).to_string(), "() -> (0)");
        assert_eq!(AffineMap::constant(9).as_single_constant(), Some(9));
    }
}
