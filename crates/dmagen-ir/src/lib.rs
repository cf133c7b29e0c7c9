//! dmagen intermediate representation.
//!
//! An arena-based SSA IR with explicit affine loop nests over memrefs.
//! Statements form a tree: `for` statements own a body block, operations
//! are leaves. Handles into the per-function arenas stay stable across
//! mutation, so passes can hold on to them while rewriting.

pub mod affine;
pub mod arena;
mod builder;
mod display;
mod error;
mod func;
mod stmt;
mod types;
mod verify;

pub use affine::{AffineBinaryOp, AffineExpr, AffineMap, LinearExpr};
pub use arena::{Arena, Handle};
pub use builder::{Builder, InsertPoint};
pub use display::{dump_function, dump_module};
pub use error::IrError;
pub use func::{Ancestors, Function};
pub use stmt::{
    AffineBound, BinaryOp, Block, ForStmt, Operation, Statement, StatementKind, Value, ValueDef,
};
pub use types::{Bytes, Dimension, MemRefType, Scalar, ScalarKind, Type};
pub use verify::verify_function;

/// A dmagen IR module: a list of functions.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub functions: Arena<Function>,
}

impl Module {
    /// Finds a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(_, f)| f)
    }
}
