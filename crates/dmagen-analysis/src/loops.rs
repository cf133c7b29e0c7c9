//! Loop nest queries.

use dmagen_ir::{Function, Handle, Statement, Value};

/// The `for` statements enclosing `stmt`, outermost first.
pub fn enclosing_loops(func: &Function, stmt: Handle<Statement>) -> Vec<Handle<Statement>> {
    let mut loops: Vec<_> = func
        .ancestors(stmt)
        .filter(|&s| func.as_for(s).is_some())
        .collect();
    loops.reverse();
    loops
}

/// Number of `for` statements strictly enclosing `stmt`; 0 at top level.
pub fn nesting_depth(func: &Function, stmt: Handle<Statement>) -> usize {
    func.ancestors(stmt)
        .filter(|&s| func.as_for(s).is_some())
        .count()
}

/// Induction variables of `loops`, in the same order.
pub fn induction_vars(func: &Function, loops: &[Handle<Statement>]) -> Vec<Handle<Value>> {
    loops
        .iter()
        .filter_map(|&s| func.as_for(s).map(|f| f.induction_var))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmagen_ir::{AffineBound, Builder};

    #[test]
    fn depth_and_enclosing_loops() {
        let mut f = Function::new("f");
        let ret = Builder::at_end(None).ret(&mut f);
        let bound = |n| AffineBound::constant(n);
        let (outer, i) = Builder::before(ret).for_loop(&mut f, bound(0), bound(8), 1);
        let (inner, j) = Builder::at_end(Some(outer)).for_loop(&mut f, bound(0), bound(8), 1);
        let c = Builder::at_end(Some(inner)).constant_index(&mut f, 1);
        let leaf = f.defining_statement(c).unwrap();

        assert_eq!(nesting_depth(&f, ret), 0);
        assert_eq!(nesting_depth(&f, outer), 0);
        assert_eq!(nesting_depth(&f, inner), 1);
        assert_eq!(nesting_depth(&f, leaf), 2);
        assert_eq!(enclosing_loops(&f, leaf), vec![outer, inner]);
        assert_eq!(induction_vars(&f, &enclosing_loops(&f, leaf)), vec![i, j]);
        assert!(enclosing_loops(&f, outer).is_empty());
    }
}
