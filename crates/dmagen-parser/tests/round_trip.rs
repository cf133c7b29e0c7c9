//! Integration tests: text in, DMA generation, text out, text back in.

use dmagen_ir::{dump_module, verify_function};
use dmagen_opt::{DmaGeneration, Pass};
use dmagen_parser::{parse_function, parse_module};

const TILED: &str = "\
func @tiled_copy(%A: memref<128x128xf32>, %B: memref<128x128xf32>) {
  for %i = 0 to 128 step 32 {
    for %j = 0 to 128 step 32 {
      for %ii = %i to (d0) -> (d0 + 32)(%i) {
        for %jj = %j to (d0) -> (d0 + 32)(%j) {
          %0 = load %A[%ii, %jj] : memref<128x128xf32>
          %1 = addf %0, %0 : f32
          store %1, %B[%ii, %jj] : memref<128x128xf32>
        }
      }
    }
  }
  return
}
";

#[test]
fn source_round_trips() {
    let module = parse_module(TILED).unwrap();
    assert_eq!(dump_module(&module), TILED);
}

#[test]
fn generated_dmas_round_trip() {
    let mut module = parse_module(TILED).unwrap();
    assert!(DmaGeneration::default().run(&mut module));
    let once = dump_module(&module);
    assert!(once.contains("dma_start %A[%"));
    assert!(once.contains("memref<32x32xf32, 1>"));

    let reparsed = parse_module(&once).unwrap();
    let (_, f) = reparsed.functions.iter().next().unwrap();
    assert_eq!(verify_function(f), Ok(()));
    assert_eq!(dump_module(&reparsed), once);
}

#[test]
fn window_copy_dump() {
    let mut module = parse_module(
        "\
func @window(%A: memref<64xf32>) {
  for %i = 0 to 16 {
    %0 = affine_apply (d0) -> (d0 + 8)(%i)
    %1 = load %A[%0] : memref<64xf32>
  }
  return
}
",
    )
    .unwrap();
    assert!(DmaGeneration::default().run(&mut module));
    assert_eq!(
        dump_module(&module),
        "\
func @window(%A: memref<64xf32>) {
  %0 = constant 0 : index
  %1 = constant 8 : index
  %2 = alloc() : memref<16xf32, 1>
  %3 = alloc() : memref<1xi32>
  %4 = constant 16 : index
  dma_start %A[%1], %2[%0], %4, %3[%0] : memref<64xf32>, memref<16xf32, 1>, memref<1xi32>
  dma_wait %3[%0], %4 : memref<1xi32>
  for %i = 0 to 16 {
    %5 = affine_apply (d0) -> (d0 + 8)(%i)
    %6 = affine_apply (d0) -> (d0 - 8)(%5)
    %7 = load %2[%6] : memref<16xf32, 1>
  }
  return
}
"
    );
}

#[test]
fn store_region_is_copied_out() {
    let mut f = parse_function(
        "\
func @fill(%A: memref<8xf32>, %v: f32) {
  for %i = 0 to 8 {
    store %v, %A[%i] : memref<8xf32>
  }
  return
}
",
    )
    .unwrap();
    assert!(DmaGeneration::default().run_on_function(&mut f));
    let text = dmagen_ir::dump_function(&f);
    let loop_end = text.find("  }\n").unwrap();
    let copy_out = text.find("dma_start %").unwrap();
    assert!(copy_out > loop_end);
    assert!(text.contains(", %A[%"));
    assert!(text.contains("store %v, %"));
}

#[test]
fn errors_carry_positions() {
    let err = parse_module("func @f() {\n  for %i = 0 to 4 step -1 {\n  }\n}\n").unwrap_err();
    assert_eq!(err.line, 2);
    assert_eq!(err.message, "loop step must be positive");
}
