//! Text format parser for dmagen.
//!
//! Reads the syntax produced by [`dmagen_ir::dump_module`] back into a
//! [`dmagen_ir::Module`]:
//!
//! ```text
//! func @copy(%A: memref<256xf32>, %B: memref<256xf32, 1>) {
//!   for %i = 0 to 256 step 32 {
//!     for %ii = %i to (d0) -> (d0 + 32)(%i) {
//!       %0 = load %A[%ii] : memref<256xf32>
//!       store %0, %B[%ii] : memref<256xf32, 1>
//!     }
//!   }
//!   return
//! }
//! ```
//!
//! Values are scoped: induction variables are visible inside their loop,
//! operation results until the end of their block. `//` starts a comment.

mod lexer;
mod parser;

use dmagen_ir::{Function, Module};

/// A syntax or scoping error at a 1-based source position.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Parses a module of zero or more functions.
pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let tokens = lexer::tokenize(source)?;
    parser::Parser::new(tokens).module()
}

/// Parses source that holds exactly one function.
pub fn parse_function(source: &str) -> Result<Function, ParseError> {
    let module = parse_module(source)?;
    let count = module.functions.len();
    let mut functions = module.functions.into_values();
    match (functions.next(), count) {
        (Some(func), 1) => Ok(func),
        _ => Err(ParseError {
            line: 1,
            column: 1,
            message: format!("expected exactly one function, found {count}"),
        }),
    }
}
