//! Optimization passes for dmagen.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] with fixed-point iteration,
//! the [`DmaGeneration`] pass and the memref use rewriting it is built on.

pub mod dma_generate;
pub mod utils;
mod validation;

pub use dma_generate::{
    DmaError, DmaGeneration, DmaGenerationOptions, FastBufferMap, LoopDmaContext, select_dma_loop,
};
pub use utils::{
    IndexRemap, RewriteError, check_memref_uses_replaceable, replace_all_memref_uses_with,
};
pub use validation::{IrValidation, validate_module};

use std::fmt::Debug;

use dmagen_ir::Module;

/// A pass that transforms an IR module.
pub trait Pass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Run the pass on a module. Returns `true` if anything was modified.
    fn run(&self, module: &mut Module) -> bool;
}

/// Names accepted by [`create_pass`].
pub const PASS_NAMES: &[&str] = &["dma-generate", "ir-validation"];

/// Looks up a pass by name.
pub fn create_pass(name: &str, options: &DmaGenerationOptions) -> Option<Box<dyn Pass>> {
    match name {
        "dma-generate" => Some(Box::new(DmaGeneration::new(options.clone()))),
        "ir-validation" => Some(Box::new(IrValidation)),
        _ => None,
    }
}

/// Maximum number of fixed-point iterations before giving up.
const MAX_ITERATIONS: usize = 10;

/// Runs passes in sequence with fixed-point iteration.
#[derive(Debug)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Adds a pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs all passes until a fixed point is reached or the iteration limit.
    /// Returns `true` if any pass modified the module.
    pub fn run(&self, module: &mut Module) -> bool {
        let mut any = false;
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                let modified = pass.run(module);
                log::debug!("iteration {iteration}: {} modified={modified}", pass.name());
                changed |= modified;
            }
            any |= changed;
            if !changed {
                break;
            }
        }
        any
    }
}

/// Convenience function: runs DMA generation with default options.
pub fn generate_dmas(module: &mut Module) -> bool {
    let mut pm = PassManager::new();
    pm.add_pass(Box::new(DmaGeneration::default()));
    pm.run(module)
}
