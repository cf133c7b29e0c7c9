//! Integration tests: run DMA generation over programmatically built loop
//! nests and inspect the rewritten IR.

use dmagen_ir::*;
use dmagen_opt::{
    DmaError, DmaGeneration, DmaGenerationOptions, LoopDmaContext, Pass, PassManager, create_pass,
};

fn konst(n: i64) -> AffineBound {
    AffineBound::constant(n)
}

fn name(f: &mut Function, value: Handle<Value>, text: &str) {
    f.values[value].name = Some(text.into());
}

fn single(f: Function) -> Module {
    let mut module = Module::default();
    module.functions.append(f);
    module
}

fn ops<'a>(f: &'a Function, mnemonic: &str) -> Vec<(Handle<Statement>, &'a Operation)> {
    let mut found = Vec::new();
    f.walk_all(&mut |stmt| {
        if let Some(op) = f.as_op(stmt) {
            if op.mnemonic() == mnemonic {
                found.push((stmt, op));
            }
        }
    });
    found
}

fn constant_of(f: &Function, value: Handle<Value>) -> Option<i64> {
    match f.defining_op(value)? {
        Operation::Constant { value, .. } => Some(*value),
        _ => None,
    }
}

fn fast_allocs(f: &Function, space: u32) -> usize {
    ops(f, "alloc")
        .iter()
        .filter(|(_, op)| {
            op.result()
                .and_then(|r| f.memref_type(r))
                .is_some_and(|ty| ty.memory_space == space)
        })
        .count()
}

/// ```text
/// for %t = 0 to 1024
///   for %i = 0 to 64
///     for %j = 0 to 64
///       %r = affine_apply (d0) -> (d0 + 10)(%i)
///       %c = affine_apply (d0) -> (d0 + 20)(%j)
///       %x = load %A[%r, %c]
/// ```
fn window(step: u64) -> (Function, Handle<Value>) {
    let mut f = Function::new("window");
    let a = f.add_argument("A", Type::MemRef(MemRefType::new(&[128, 128], Scalar::F32, 0)));
    let (t_loop, t) = Builder::at_end(None).for_loop(&mut f, konst(0), konst(1024), step);
    let (i_loop, i) = Builder::at_end(Some(t_loop)).for_loop(&mut f, konst(0), konst(64), 1);
    let (j_loop, j) = Builder::at_end(Some(i_loop)).for_loop(&mut f, konst(0), konst(64), 1);
    name(&mut f, t, "t");
    name(&mut f, i, "i");
    name(&mut f, j, "j");
    let mut body = Builder::at_end(Some(j_loop));
    let r = body.affine_apply(&mut f, AffineMap::new(1, 0, vec![AffineExpr::dim(0) + 10]), vec![i]);
    let c = body.affine_apply(&mut f, AffineMap::new(1, 0, vec![AffineExpr::dim(0) + 20]), vec![j]);
    name(&mut f, r, "r");
    name(&mut f, c, "c");
    body.load(&mut f, a, vec![r, c]);
    Builder::at_end(None).ret(&mut f);
    (f, a)
}

#[test]
fn window_is_copied_into_fast_buffer() {
    let (f, a) = window(1);
    let mut module = single(f);
    assert!(DmaGeneration::default().run(&mut module));
    let (_, f) = module.functions.iter().next().unwrap();
    assert_eq!(verify_function(f), Ok(()));

    let text = dump_function(f);
    assert_eq!(text.matches("alloc() : memref<64x64xf32, 1>").count(), 1);

    let starts = ops(f, "dma_start");
    assert_eq!(starts.len(), 1);
    assert_eq!(ops(f, "dma_wait").len(), 1);

    // copy-in sits before the loop, at top level
    let (start_stmt, start) = starts[0];
    let t_loop = f.top_level_loops()[0];
    assert_eq!(f.parent(start_stmt), None);
    assert!(f.position_in_block(start_stmt) < f.position_in_block(t_loop));

    let Operation::DmaStart {
        source,
        source_indices,
        destination,
        destination_indices,
        num_elements,
        tag,
        tag_indices,
    } = start
    else {
        unreachable!()
    };
    assert_eq!(*source, a);
    let lower: Vec<_> = source_indices.iter().map(|&v| constant_of(f, v)).collect();
    assert_eq!(lower, [Some(10), Some(20)]);
    assert!(destination_indices.iter().all(|&v| constant_of(f, v) == Some(0)));
    assert_eq!(constant_of(f, *num_elements), Some(4096));
    assert_eq!(f.memref_type(*tag), Some(&MemRefType::new(&[1], Scalar::I32, 0)));
    assert_eq!(tag_indices.len(), 1);

    // the load now reads the fast buffer with the lower bound subtracted
    let loads = ops(f, "load");
    assert_eq!(loads.len(), 1);
    let Operation::Load { memref, indices, .. } = loads[0].1 else {
        unreachable!()
    };
    assert_eq!(memref, destination);
    let remapped: Vec<String> = indices
        .iter()
        .map(|&v| match f.defining_op(v) {
            Some(Operation::AffineApply { map, .. }) => map.to_string(),
            other => panic!("index not remapped: {other:?}"),
        })
        .collect();
    assert_eq!(remapped, ["(d0, d1) -> (d0 - 10)", "(d0, d1) -> (d1 - 20)"]);
    assert!(text.contains("affine_apply (d0, d1) -> (d0 - 10)(%r, %c)"));
}

#[test]
fn strided_loop_without_inner_loop_is_untouched() {
    let mut f = Function::new("strided");
    let a = f.add_argument("A", Type::MemRef(MemRefType::new(&[1024], Scalar::F32, 0)));
    let (lp, i) = Builder::at_end(None).for_loop(&mut f, konst(0), konst(1024), 4);
    Builder::at_end(Some(lp)).load(&mut f, a, vec![i]);
    Builder::at_end(None).ret(&mut f);
    let mut module = single(f);
    let before = dump_module(&module);

    assert!(!DmaGeneration::default().run(&mut module));
    assert_eq!(dump_module(&module), before);
}

#[test]
fn strided_loop_over_window_nest_still_descends() {
    let (f, _) = window(4);
    let mut module = single(f);
    assert!(DmaGeneration::default().run(&mut module));
    let (_, f) = module.functions.iter().next().unwrap();
    // %t steps by 4, so the copy goes around %i, inside %t
    let (start_stmt, _) = ops(f, "dma_start")[0];
    assert_eq!(f.parent(start_stmt), Some(f.top_level_loops()[0]));
    assert!(dump_function(f).contains("alloc() : memref<64x64xf32, 1>"));
}

#[test]
fn non_constant_write_region_is_skipped() {
    // for %i = 0 to 8 { %x = load %A[%i]; for %k = 0 to %n { store %x, %B[%k] } }
    let mut f = Function::new("partial");
    let ty = MemRefType::new(&[256], Scalar::F32, 0);
    let a = f.add_argument("A", Type::MemRef(ty.clone()));
    let b = f.add_argument("B", Type::MemRef(ty));
    let n = f.add_argument("n", Type::Index);
    let (lp, i) = Builder::at_end(None).for_loop(&mut f, konst(0), konst(8), 1);
    let x = Builder::at_end(Some(lp)).load(&mut f, a, vec![i]);
    let (inner, k) = Builder::at_end(Some(lp)).for_loop(&mut f, konst(0), AffineBound::value(n), 1);
    Builder::at_end(Some(inner)).store(&mut f, x, b, vec![k]);
    Builder::at_end(None).ret(&mut f);
    let mut module = single(f);

    assert!(DmaGeneration::default().run(&mut module));
    let (_, f) = module.functions.iter().next().unwrap();
    assert_eq!(verify_function(f), Ok(()));

    let starts = ops(f, "dma_start");
    assert_eq!(starts.len(), 1);
    assert!(matches!(starts[0].1, Operation::DmaStart { source, .. } if *source == a));
    assert!(dump_function(f).contains("alloc() : memref<8xf32, 1>"));
    assert_eq!(fast_allocs(f, 1), 1);

    let stores = ops(f, "store");
    assert!(matches!(stores[0].1, Operation::Store { memref, .. } if *memref == b));
}

/// `for %i = 0 to 16 { %x = load %A[%i]; %y = load %A[%i]; store (%x + %y), %A[%i] }`
fn accumulate() -> Function {
    let mut f = Function::new("accumulate");
    let a = f.add_argument("A", Type::MemRef(MemRefType::new(&[16], Scalar::F32, 0)));
    let (lp, i) = Builder::at_end(None).for_loop(&mut f, konst(0), konst(16), 1);
    name(&mut f, i, "i");
    let mut body = Builder::at_end(Some(lp));
    let x = body.load(&mut f, a, vec![i]);
    let y = body.load(&mut f, a, vec![i]);
    let sum = body.binary(&mut f, BinaryOp::AddF, x, y);
    body.store(&mut f, sum, a, vec![i]);
    Builder::at_end(None).ret(&mut f);
    f
}

#[test]
fn one_buffer_per_memref() {
    let mut module = single(accumulate());
    assert!(DmaGeneration::default().run(&mut module));
    let (_, f) = module.functions.iter().next().unwrap();
    assert_eq!(verify_function(f), Ok(()));

    assert_eq!(fast_allocs(f, 1), 1);
    // one tag per transfer
    assert_eq!(ops(f, "dma_start").len(), 3);
    assert_eq!(ops(f, "dma_wait").len(), 3);
    assert_eq!(ops(f, "alloc").len(), 4);
}

#[test]
fn transfer_direction_follows_access() {
    let mut module = single(accumulate());
    DmaGeneration::default().run(&mut module);
    let (_, f) = module.functions.iter().next().unwrap();
    let lp = f.top_level_loops()[0];
    let loop_pos = f.position_in_block(lp).unwrap();

    let a = f.arguments[0];
    for (stmt, op) in ops(f, "dma_start") {
        let Operation::DmaStart {
            source,
            source_indices,
            destination,
            destination_indices,
            ..
        } = op
        else {
            unreachable!()
        };
        let pos = f.position_in_block(stmt).unwrap();
        if *source == a {
            assert!(pos < loop_pos);
            assert!(destination_indices.iter().all(|&v| constant_of(f, v) == Some(0)));
        } else {
            assert_eq!(*destination, a);
            assert!(pos > loop_pos);
            assert!(source_indices.iter().all(|&v| constant_of(f, v) == Some(0)));
        }
    }
    // every wait directly follows its start
    for (stmt, _) in ops(f, "dma_start") {
        let pos = f.position_in_block(stmt).unwrap();
        let next = f.body[pos + 1];
        assert_eq!(f.as_op(next).map(Operation::mnemonic), Some("dma_wait"));
    }
}

#[test]
fn second_run_is_a_noop() {
    let mut module = single(accumulate());
    assert!(DmaGeneration::default().run(&mut module));
    let once = dump_module(&module);
    assert!(!DmaGeneration::default().run(&mut module));
    assert_eq!(dump_module(&module), once);
}

#[test]
fn pass_manager_reaches_fixed_point() {
    let mut module = single(accumulate());
    let mut pm = PassManager::new();
    let options = DmaGenerationOptions::default();
    pm.add_pass(create_pass("dma-generate", &options).unwrap());
    pm.add_pass(create_pass("ir-validation", &options).unwrap());
    assert!(pm.run(&mut module));
    let (_, f) = module.functions.iter().next().unwrap();
    assert_eq!(ops(f, "dma_start").len(), 3);
}

/// `for %i = 0 to 16 { %t = alloc memref<16xf32>; %v = load %A[%i]; store %v, %t[%i] }`
fn local_buffer() -> (Function, Handle<Value>, Handle<Value>) {
    let mut f = Function::new("local");
    let a = f.add_argument("A", Type::MemRef(MemRefType::new(&[16], Scalar::F32, 0)));
    let (lp, i) = Builder::at_end(None).for_loop(&mut f, konst(0), konst(16), 1);
    name(&mut f, i, "i");
    let mut body = Builder::at_end(Some(lp));
    let t = body.alloc(&mut f, MemRefType::new(&[16], Scalar::F32, 0));
    name(&mut f, t, "t");
    let v = body.load(&mut f, a, vec![i]);
    body.store(&mut f, v, t, vec![i]);
    Builder::at_end(None).ret(&mut f);
    (f, a, t)
}

#[test]
fn buffer_allocated_in_loop_is_not_promoted() {
    let (f, a, t) = local_buffer();
    assert_eq!(verify_function(&f), Ok(()));
    let lp = f.top_level_loops()[0];
    let mut ctx = LoopDmaContext::new(&f, lp);
    ctx.collect_regions(&f, 0);
    let local = ctx
        .regions
        .iter()
        .find(|region| region.memref == t)
        .cloned()
        .unwrap();

    let mut f = f;
    let before = dump_function(&f);
    assert_eq!(
        DmaGeneration::default().generate_dma(&mut f, &mut ctx, &local),
        Err(DmaError::DefinedInLoop { memref: t.index() })
    );
    assert_eq!(dump_function(&f), before);

    let mut module = single(f);
    assert!(DmaGeneration::default().run(&mut module));
    let (_, f) = module.functions.iter().next().unwrap();
    assert_eq!(verify_function(f), Ok(()));
    let starts = ops(f, "dma_start");
    assert_eq!(starts.len(), 1);
    assert!(matches!(starts[0].1, Operation::DmaStart { source, .. } if *source == a));
    let stores = ops(f, "store");
    assert!(matches!(stores[0].1, Operation::Store { memref, .. } if *memref == t));
}

#[test]
fn empty_loop_generates_nothing() {
    let mut f = Function::new("empty");
    let a = f.add_argument("A", Type::MemRef(MemRefType::new(&[16], Scalar::F32, 0)));
    let (lp, i) = Builder::at_end(None).for_loop(&mut f, konst(10), konst(5), 1);
    Builder::at_end(Some(lp)).load(&mut f, a, vec![i]);
    Builder::at_end(None).ret(&mut f);

    let mut ctx = LoopDmaContext::new(&f, lp);
    ctx.collect_regions(&f, 0);
    assert_eq!(ctx.regions.len(), 1);
    let region = ctx.regions[0].clone();
    assert_eq!(
        DmaGeneration::default().generate_dma(&mut f, &mut ctx, &region),
        Err(DmaError::EmptyRegion { memref: a.index() })
    );

    let mut module = single(f);
    let before = dump_module(&module);
    assert!(!DmaGeneration::default().run(&mut module));
    assert_eq!(dump_module(&module), before);
}

#[test]
fn sibling_loops_get_their_own_buffers() {
    let mut f = Function::new("siblings");
    let a = f.add_argument("A", Type::MemRef(MemRefType::new(&[16], Scalar::F32, 0)));
    for _ in 0..2 {
        let (lp, i) = Builder::at_end(None).for_loop(&mut f, konst(0), konst(16), 1);
        Builder::at_end(Some(lp)).load(&mut f, a, vec![i]);
    }
    Builder::at_end(None).ret(&mut f);
    let mut module = single(f);

    assert!(DmaGeneration::default().run(&mut module));
    let (_, f) = module.functions.iter().next().unwrap();
    assert_eq!(fast_allocs(f, 1), 2);
}

/// 128x128 copy tiled by 32, as in the ir crate's tiled nest.
fn tiled_copy() -> Function {
    let tile_upper = |iv| AffineBound {
        map: AffineMap::new(1, 0, vec![AffineExpr::dim(0) + 32]),
        operands: vec![iv],
    };
    let mut f = Function::new("tiled_copy");
    let ty = MemRefType::new(&[128, 128], Scalar::F32, 0);
    let a = f.add_argument("A", Type::MemRef(ty.clone()));
    let b = f.add_argument("B", Type::MemRef(ty));
    let (i_loop, i) = Builder::at_end(None).for_loop(&mut f, konst(0), konst(128), 32);
    let (j_loop, j) = Builder::at_end(Some(i_loop)).for_loop(&mut f, konst(0), konst(128), 32);
    let (ii_loop, ii) =
        Builder::at_end(Some(j_loop)).for_loop(&mut f, AffineBound::value(i), tile_upper(i), 1);
    let (jj_loop, jj) =
        Builder::at_end(Some(ii_loop)).for_loop(&mut f, AffineBound::value(j), tile_upper(j), 1);
    for (value, text) in [(i, "i"), (j, "j"), (ii, "ii"), (jj, "jj")] {
        name(&mut f, value, text);
    }
    let mut body = Builder::at_end(Some(jj_loop));
    let x = body.load(&mut f, a, vec![ii, jj]);
    body.store(&mut f, x, b, vec![ii, jj]);
    Builder::at_end(None).ret(&mut f);
    f
}

#[test]
fn tiled_nest_uses_symbolic_offsets() {
    let mut module = single(tiled_copy());
    assert!(DmaGeneration::default().run(&mut module));
    let (_, f) = module.functions.iter().next().unwrap();
    assert_eq!(verify_function(f), Ok(()));

    let text = dump_function(f);
    assert_eq!(text.matches("alloc() : memref<32x32xf32, 1>").count(), 2);
    assert!(text.contains("affine_apply (d0, d1) -> (d0)(%i, %j)"));
    assert!(text.contains("affine_apply (d0, d1) -> (d1)(%i, %j)"));
    assert!(text.contains("affine_apply (d0, d1)[s0, s1] -> (d0 - s0)(%ii, %jj)[%i, %j]"));
    assert!(text.contains("affine_apply (d0, d1)[s0, s1] -> (d1 - s1)(%ii, %jj)[%i, %j]"));

    // both transfers live in the %j tile loop, around the %ii loop
    let j_loop = f.as_for(f.top_level_loops()[0]).unwrap().body[0];
    let ii_loop = *f
        .as_for(j_loop)
        .unwrap()
        .body
        .iter()
        .find(|&&s| f.as_for(s).is_some())
        .unwrap();
    let ii_pos = f.position_in_block(ii_loop).unwrap();
    let starts = ops(f, "dma_start");
    assert_eq!(starts.len(), 2);
    for (stmt, op) in starts {
        assert_eq!(f.parent(stmt), Some(j_loop));
        let pos = f.position_in_block(stmt).unwrap();
        let Operation::DmaStart { source, .. } = op else {
            unreachable!()
        };
        if *source == f.arguments[0] {
            assert!(pos < ii_pos);
        } else {
            assert!(pos > ii_pos);
        }
    }
    assert_eq!(constant_of(f, *ops(f, "dma_wait")[0].1.operands().last().unwrap()), Some(1024));
}
