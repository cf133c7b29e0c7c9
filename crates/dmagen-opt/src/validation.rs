//! IR validation pass.
//!
//! Runs the structural verifier over every function and logs a warning for
//! each problem found. This pass never modifies the module.

use dmagen_ir::{Module, verify_function};

use crate::Pass;

/// Validates IR structural invariants. Returns `false` (never modifies the module).
#[derive(Debug)]
pub struct IrValidation;

impl Pass for IrValidation {
    fn name(&self) -> &str {
        "ir-validation"
    }

    fn run(&self, module: &mut Module) -> bool {
        validate_module(module);
        false
    }
}

/// Number of functions that failed verification.
pub fn validate_module(module: &Module) -> usize {
    let mut failures = 0;
    for (handle, func) in module.functions.iter() {
        if let Err(err) = verify_function(func) {
            log::warn!("function '{}' ({:?}): {}", func.name, handle, err);
            failures += 1;
        }
    }
    failures
}
