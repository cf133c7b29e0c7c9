//! DMA generation.
//!
//! Promotes the memref regions accessed inside a loop from the slow memory
//! space into freshly allocated buffers in the fast memory space. Reads are
//! copied in with a `dma_start`/`dma_wait` pair right before the loop, writes
//! are copied out right after it, and every access inside the loop is
//! rewritten to address the fast buffer relative to the region's lower
//! bound.
//!
//! The pass targets the outermost unit-step loop of each top-level nest,
//! descending through non-unit-step loops (tile loops) whose body starts
//! with another loop. Nests that do not have that shape are left alone.

use std::collections::HashMap;

use dmagen_analysis::{MemRefRegion, classify_access, compute_memref_region, nesting_depth};
use dmagen_ir::{
    AffineExpr, AffineMap, Builder, Function, Handle, LinearExpr, MemRefType, Module, Operation,
    Scalar, Statement, Value,
};

use crate::Pass;
use crate::utils::{
    IndexRemap, RewriteError, check_memref_uses_replaceable, replace_all_memref_uses_with,
};

// ---------------------------------------------------------------------------
// Options and errors
// ---------------------------------------------------------------------------

/// Configuration of the [`DmaGeneration`] pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DmaGenerationOptions {
    /// Memory space whose memrefs get promoted.
    pub slow_memory_space: u32,
    /// Memory space of the generated buffers.
    pub fast_memory_space: u32,
    /// Smallest transfer the target supports, in bytes. Recorded only.
    pub min_dma_transfer_size: u64,
    /// Process-wide override of `fast_memory_space`; wins when set.
    pub fast_memory_space_override: Option<u32>,
}

impl Default for DmaGenerationOptions {
    fn default() -> Self {
        Self {
            slow_memory_space: 0,
            fast_memory_space: 1,
            min_dma_transfer_size: 1024,
            fast_memory_space_override: None,
        }
    }
}

impl DmaGenerationOptions {
    /// The fast memory space actually used for new buffers.
    pub fn effective_fast_memory_space(&self) -> u32 {
        self.fast_memory_space_override
            .unwrap_or(self.fast_memory_space)
    }
}

/// Reasons a region is left untouched.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DmaError {
    #[error("region of memref {memref} has no constant size")]
    NonConstantSize { memref: usize },

    #[error("region of memref {memref} is empty, nothing to transfer")]
    EmptyRegion { memref: usize },

    #[error("value {memref} is not a memref")]
    NotAMemRef { memref: usize },

    #[error("memref {memref} is defined inside the target loop")]
    DefinedInLoop { memref: usize },

    #[error("target loop has an empty body")]
    EmptyLoop,

    #[error("offset of memref {memref} overflows")]
    Overflow { memref: usize },

    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}

// ---------------------------------------------------------------------------
// Per-loop state
// ---------------------------------------------------------------------------

/// Slow memref to the fast buffer replacing it.
pub type FastBufferMap = HashMap<Handle<Value>, Handle<Value>>;

/// State for one selected loop: the regions found in it and the buffers
/// created so far. Built fresh for every loop, so nothing is shared across
/// nests.
#[derive(Debug)]
pub struct LoopDmaContext {
    /// The loop DMAs are placed around.
    pub target: Handle<Statement>,
    /// Nesting depth of `target`; regions are computed at this depth.
    pub dma_depth: usize,
    pub regions: Vec<MemRefRegion>,
    pub fast_buffers: FastBufferMap,
}

impl LoopDmaContext {
    pub fn new(func: &Function, target: Handle<Statement>) -> Self {
        Self {
            target,
            dma_depth: nesting_depth(func, target),
            regions: Vec::new(),
            fast_buffers: FastBufferMap::new(),
        }
    }

    /// Computes a region for every load and store under `target` whose
    /// memref lives in `slow_memory_space`. Accesses whose region cannot be
    /// computed are skipped.
    pub fn collect_regions(&mut self, func: &Function, slow_memory_space: u32) {
        let depth = self.dma_depth;
        let regions = &mut self.regions;
        func.walk(self.target, &mut |stmt| {
            let Some(op) = func.as_op(stmt) else {
                return;
            };
            let access = classify_access(op);
            let Some(memref) = access.memref() else {
                return;
            };
            if func.memref_type(memref).map(|ty| ty.memory_space) != Some(slow_memory_space) {
                return;
            }
            match compute_memref_region(func, stmt, depth) {
                Ok(region) => {
                    log::debug!(
                        "{} region of {memref:?} at depth {depth}:\n{}",
                        if access.is_write() { "write" } else { "read" },
                        region.cst
                    );
                    regions.push(region);
                }
                Err(err) => log::debug!("no region for {} of {memref:?}: {err}", op.mnemonic()),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Loop selection
// ---------------------------------------------------------------------------

/// Picks the loop to generate DMAs around, starting from `top`.
///
/// Non-unit-step loops are skipped when their first statement is another
/// loop; otherwise there is no target.
pub fn select_dma_loop(func: &Function, top: Handle<Statement>) -> Option<Handle<Statement>> {
    let mut current = top;
    loop {
        let for_stmt = func.as_for(current)?;
        if for_stmt.is_unit_step() {
            return Some(current);
        }
        let &first = for_stmt.body.first()?;
        func.as_for(first)?;
        current = first;
    }
}

// ---------------------------------------------------------------------------
// The pass
// ---------------------------------------------------------------------------

/// Generates DMAs for slow-memory accesses of each top-level loop nest.
#[derive(Debug, Default)]
pub struct DmaGeneration {
    options: DmaGenerationOptions,
}

impl Pass for DmaGeneration {
    fn name(&self) -> &str {
        "dma-generate"
    }

    fn run(&self, module: &mut Module) -> bool {
        let mut changed = false;
        for (_, func) in module.functions.iter_mut() {
            changed |= self.run_on_function(func);
        }
        changed
    }
}

/// Offset of a region dimension over the region's symbols, read off its
/// lower bound row `d + rest · symbols + c >= 0` as `-(rest · symbols) - c`.
fn offset_from_lower_bound(lower_bound: &[i64], rank: usize) -> Option<LinearExpr> {
    let (&constant, coeffs) = lower_bound.split_last()?;
    let coeffs = coeffs
        .get(rank..)?
        .iter()
        .map(|c| c.checked_neg())
        .collect::<Option<Vec<_>>>()?;
    Some(LinearExpr {
        coeffs,
        constant: constant.checked_neg()?,
    })
}

impl DmaGeneration {
    pub fn new(options: DmaGenerationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DmaGenerationOptions {
        &self.options
    }

    /// Runs on every top-level loop of `func`. Returns `true` if any region
    /// was promoted. Does nothing when the fast space is the slow one.
    pub fn run_on_function(&self, func: &mut Function) -> bool {
        let fast = self.options.effective_fast_memory_space();
        if fast == self.options.slow_memory_space {
            log::warn!(
                "fast and slow memory space are both {fast}, skipping '{}'",
                func.name
            );
            return false;
        }
        let mut changed = false;
        for top in func.top_level_loops() {
            changed |= self.run_on_loop(func, top);
        }
        changed
    }

    fn run_on_loop(&self, func: &mut Function, top: Handle<Statement>) -> bool {
        let Some(target) = select_dma_loop(func, top) else {
            log::debug!("no unit-step loop under {top:?} in '{}'", func.name);
            return false;
        };
        let mut ctx = LoopDmaContext::new(func, target);
        ctx.collect_regions(func, self.options.slow_memory_space);

        let mut changed = false;
        for region in std::mem::take(&mut ctx.regions) {
            match self.generate_dma(func, &mut ctx, &region) {
                Ok(()) => changed = true,
                Err(err) => log::debug!("skipping region of {:?}: {err}", region.memref),
            }
        }
        changed
    }

    /// Lowers one region: allocates (or reuses) the fast buffer, emits the
    /// transfer and its wait, and redirects the accesses inside the loop.
    ///
    /// All checks happen before the first statement is created, so an error
    /// leaves `func` unchanged.
    pub fn generate_dma(
        &self,
        func: &mut Function,
        ctx: &mut LoopDmaContext,
        region: &MemRefRegion,
    ) -> Result<(), DmaError> {
        let memref = region.memref;
        let id = memref.index();
        let size = region
            .constant_size()
            .ok_or(DmaError::NonConstantSize { memref: id })?;
        if size == 0 {
            return Err(DmaError::EmptyRegion { memref: id });
        }
        let (Some(shape), Some(bounds)) = (region.constant_shape(), region.dim_bounds()) else {
            return Err(DmaError::NonConstantSize { memref: id });
        };
        let num_elements =
            i64::try_from(size).map_err(|_| DmaError::Overflow { memref: id })?;
        let element = func
            .memref_type(memref)
            .map(|ty| ty.element)
            .ok_or(DmaError::NotAMemRef { memref: id })?;
        if func
            .defining_statement(memref)
            .is_some_and(|def| func.is_ancestor_or_self(ctx.target, def))
        {
            return Err(DmaError::DefinedInLoop { memref: id });
        }
        let first = func
            .as_for(ctx.target)
            .and_then(|f| f.body.first().copied())
            .ok_or(DmaError::EmptyLoop)?;
        check_memref_uses_replaceable(func, memref, &func.dominated_region(first))?;

        let rank = region.rank();
        let symbols = region.symbol_values();
        let offsets = bounds
            .iter()
            .map(|b| offset_from_lower_bound(&b.lower_bound, rank))
            .collect::<Option<Vec<_>>>()
            .ok_or(DmaError::Overflow { memref: id })?;

        let mut prologue = Builder::before(ctx.target);
        let mut epilogue = Builder::after(ctx.target);

        let zero = prologue.constant_index(func, 0);
        let mut source_indices = Vec::with_capacity(rank);
        for offset in &offsets {
            let index = match offset.as_constant() {
                Some(c) => prologue.constant_index(func, c),
                None => {
                    let map = AffineMap::new(symbols.len(), 0, vec![offset.to_expr(symbols.len())]);
                    let builder = if region.write {
                        &mut epilogue
                    } else {
                        &mut prologue
                    };
                    builder.affine_apply(func, map, symbols.clone())
                }
            };
            source_indices.push(index);
        }
        let fast_indices = vec![zero; rank];

        let fast = match ctx.fast_buffers.get(&memref) {
            Some(&fast) => fast,
            None => {
                let ty = MemRefType::new(
                    &shape,
                    element,
                    self.options.effective_fast_memory_space(),
                );
                log::debug!("creating a new buffer of type {ty}");
                let fast = prologue.alloc(func, ty);
                ctx.fast_buffers.insert(memref, fast);
                fast
            }
        };
        let tag = prologue.alloc(func, MemRefType::new(&[1], Scalar::I32, 0));
        let count = prologue.constant_index(func, num_elements);

        // TODO: split or pad transfers smaller than `min_dma_transfer_size`.
        let (builder, dma) = if region.write {
            let dma = Operation::DmaStart {
                source: fast,
                source_indices: fast_indices,
                destination: memref,
                destination_indices: source_indices,
                num_elements: count,
                tag,
                tag_indices: vec![zero],
            };
            (&mut epilogue, dma)
        } else {
            let dma = Operation::DmaStart {
                source: memref,
                source_indices,
                destination: fast,
                destination_indices: fast_indices,
                num_elements: count,
                tag,
                tag_indices: vec![zero],
            };
            (&mut prologue, dma)
        };
        builder.op(func, dma);
        builder.dma_wait(func, tag, vec![zero], count);

        let remap = IndexRemap {
            map: AffineMap::new(
                rank,
                symbols.len(),
                offsets
                    .iter()
                    .enumerate()
                    .map(|(d, offset)| AffineExpr::dim(d) - offset.to_expr(0))
                    .collect(),
            ),
            symbol_operands: symbols,
        };
        let replaced = replace_all_memref_uses_with(func, memref, fast, Some(&remap), first)?;
        log::debug!("redirected {replaced} accesses of {memref:?} to {fast:?}");
        Ok(())
    }
}
