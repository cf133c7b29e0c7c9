//! Values, operations, and the statement tree.

use crate::affine::AffineMap;
use crate::arena::Handle;
use crate::types::Type;

/// A list of statements executed in order.
pub type Block = Vec<Handle<Statement>>;

/// Where an SSA value comes from.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ValueDef {
    /// The `n`-th function argument.
    Argument(usize),
    /// Induction variable of a `for` statement.
    InductionVar(Handle<Statement>),
    /// Result of an operation statement.
    Result(Handle<Statement>),
}

/// An SSA value.
#[derive(Clone, Debug)]
pub struct Value {
    /// Name from the source text, without the leading `%`.
    pub name: Option<String>,
    pub ty: Type,
    pub def: ValueDef,
}

/// A loop bound: the max (lower) or min (upper) of the map's results
/// applied to `operands`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffineBound {
    pub map: AffineMap,
    /// Dimension operands followed by symbol operands.
    pub operands: Vec<Handle<Value>>,
}

impl AffineBound {
    pub fn constant(value: i64) -> Self {
        Self {
            map: AffineMap::constant(value),
            operands: Vec::new(),
        }
    }

    /// A bound equal to a single value, `(d0) -> (d0)`.
    pub fn value(value: Handle<Value>) -> Self {
        Self {
            map: AffineMap::identity(1),
            operands: vec![value],
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.map.as_single_constant()
    }
}

/// `for %iv = lower to upper step N { body }`; `upper` is exclusive.
#[derive(Clone, Debug)]
pub struct ForStmt {
    pub induction_var: Handle<Value>,
    pub lower: AffineBound,
    pub upper: AffineBound,
    pub step: u64,
    pub body: Block,
}

impl ForStmt {
    pub fn is_unit_step(&self) -> bool {
        self.step == 1
    }

    /// Number of iterations when both bounds are constants.
    pub fn constant_trip_count(&self) -> Option<u64> {
        let lower = self.lower.as_constant()?;
        let upper = self.upper.as_constant()?;
        if upper <= lower || self.step == 0 {
            return Some(0);
        }
        let span = u64::try_from(upper - lower).ok()?;
        Some(span.div_ceil(self.step))
    }
}

/// Scalar arithmetic operators.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    AddF,
    SubF,
    MulF,
    AddI,
    SubI,
    MulI,
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::AddF => "addf",
            Self::SubF => "subf",
            Self::MulF => "mulf",
            Self::AddI => "addi",
            Self::SubI => "subi",
            Self::MulI => "muli",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Some(match name {
            "addf" => Self::AddF,
            "subf" => Self::SubF,
            "mulf" => Self::MulF,
            "addi" => Self::AddI,
            "subi" => Self::SubI,
            "muli" => Self::MulI,
            _ => return None,
        })
    }
}

/// A non-control-flow operation.
#[derive(Clone, Debug)]
pub enum Operation {
    /// `%c = constant 4 : index`.
    Constant { result: Handle<Value>, value: i64 },
    /// Single-result affine map application.
    AffineApply {
        result: Handle<Value>,
        map: AffineMap,
        operands: Vec<Handle<Value>>,
    },
    /// Allocates a statically shaped memref; its type is the result's type.
    Alloc { result: Handle<Value> },
    Dealloc { memref: Handle<Value> },
    Load {
        result: Handle<Value>,
        memref: Handle<Value>,
        indices: Vec<Handle<Value>>,
    },
    Store {
        value: Handle<Value>,
        memref: Handle<Value>,
        indices: Vec<Handle<Value>>,
    },
    /// Starts an asynchronous copy of `num_elements` elements; completion is
    /// signalled through `tag[tag_indices]`.
    DmaStart {
        source: Handle<Value>,
        source_indices: Vec<Handle<Value>>,
        destination: Handle<Value>,
        destination_indices: Vec<Handle<Value>>,
        num_elements: Handle<Value>,
        tag: Handle<Value>,
        tag_indices: Vec<Handle<Value>>,
    },
    /// Blocks until the transfer tracked by `tag[tag_indices]` completes.
    DmaWait {
        tag: Handle<Value>,
        tag_indices: Vec<Handle<Value>>,
        num_elements: Handle<Value>,
    },
    Binary {
        result: Handle<Value>,
        op: BinaryOp,
        lhs: Handle<Value>,
        rhs: Handle<Value>,
    },
    Return,
}

impl Operation {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "constant",
            Self::AffineApply { .. } => "affine_apply",
            Self::Alloc { .. } => "alloc",
            Self::Dealloc { .. } => "dealloc",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::DmaStart { .. } => "dma_start",
            Self::DmaWait { .. } => "dma_wait",
            Self::Binary { op, .. } => op.mnemonic(),
            Self::Return => "return",
        }
    }

    pub fn result(&self) -> Option<Handle<Value>> {
        match *self {
            Self::Constant { result, .. }
            | Self::AffineApply { result, .. }
            | Self::Alloc { result }
            | Self::Load { result, .. }
            | Self::Binary { result, .. } => Some(result),
            Self::Dealloc { .. }
            | Self::Store { .. }
            | Self::DmaStart { .. }
            | Self::DmaWait { .. }
            | Self::Return => None,
        }
    }

    /// All values read by this operation, in textual order.
    pub fn operands(&self) -> Vec<Handle<Value>> {
        match self {
            Self::Constant { .. } | Self::Alloc { .. } | Self::Return => Vec::new(),
            Self::AffineApply { operands, .. } => operands.clone(),
            Self::Dealloc { memref } => vec![*memref],
            Self::Load {
                memref, indices, ..
            } => std::iter::once(*memref).chain(indices.iter().copied()).collect(),
            Self::Store {
                value,
                memref,
                indices,
            } => [*value, *memref]
                .into_iter()
                .chain(indices.iter().copied())
                .collect(),
            Self::DmaStart {
                source,
                source_indices,
                destination,
                destination_indices,
                num_elements,
                tag,
                tag_indices,
            } => std::iter::once(*source)
                .chain(source_indices.iter().copied())
                .chain(std::iter::once(*destination))
                .chain(destination_indices.iter().copied())
                .chain([*num_elements, *tag])
                .chain(tag_indices.iter().copied())
                .collect(),
            Self::DmaWait {
                tag,
                tag_indices,
                num_elements,
            } => std::iter::once(*tag)
                .chain(tag_indices.iter().copied())
                .chain(std::iter::once(*num_elements))
                .collect(),
            Self::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        }
    }

    /// Every `(memref, indices)` pair this operation dereferences.
    pub fn memref_accesses(&self) -> Vec<(Handle<Value>, &[Handle<Value>])> {
        match self {
            Self::Load {
                memref, indices, ..
            }
            | Self::Store {
                memref, indices, ..
            } => vec![(*memref, indices.as_slice())],
            Self::DmaStart {
                source,
                source_indices,
                destination,
                destination_indices,
                tag,
                tag_indices,
                ..
            } => vec![
                (*source, source_indices.as_slice()),
                (*destination, destination_indices.as_slice()),
                (*tag, tag_indices.as_slice()),
            ],
            Self::DmaWait {
                tag, tag_indices, ..
            } => vec![(*tag, tag_indices.as_slice())],
            _ => Vec::new(),
        }
    }

    /// Mutable access to the `slot`-th pair reported by
    /// [`memref_accesses`](Self::memref_accesses).
    pub fn memref_access_mut(
        &mut self,
        slot: usize,
    ) -> Option<(&mut Handle<Value>, &mut Vec<Handle<Value>>)> {
        match self {
            Self::Load {
                memref, indices, ..
            }
            | Self::Store {
                memref, indices, ..
            } if slot == 0 => Some((memref, indices)),
            Self::DmaStart {
                source,
                source_indices,
                destination,
                destination_indices,
                tag,
                tag_indices,
                ..
            } => match slot {
                0 => Some((source, source_indices)),
                1 => Some((destination, destination_indices)),
                2 => Some((tag, tag_indices)),
                _ => None,
            },
            Self::DmaWait {
                tag, tag_indices, ..
            } if slot == 0 => Some((tag, tag_indices)),
            _ => None,
        }
    }
}

/// The two kinds of statement: loops and operations.
#[derive(Clone, Debug)]
pub enum StatementKind {
    For(ForStmt),
    Op(Operation),
}

/// A statement together with a link to its enclosing `for`, if any.
#[derive(Clone, Debug)]
pub struct Statement {
    pub kind: StatementKind,
    /// `None` for statements in the function body.
    pub parent: Option<Handle<Statement>>,
}

impl Statement {
    pub fn as_for(&self) -> Option<&ForStmt> {
        match &self.kind {
            StatementKind::For(for_stmt) => Some(for_stmt),
            StatementKind::Op(_) => None,
        }
    }

    pub fn as_op(&self) -> Option<&Operation> {
        match &self.kind {
            StatementKind::Op(op) => Some(op),
            StatementKind::For(_) => None,
        }
    }

    pub fn is_for(&self) -> bool {
        matches!(self.kind, StatementKind::For(_))
    }
}
