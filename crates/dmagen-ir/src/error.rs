//! Error types for the dmagen IR.

/// Structural problems found by [`verify_function`](crate::verify_function).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IrError {
    /// A statement handle is out of bounds or its parent link is stale.
    #[error("statement {stmt} is not attached where its parent link says")]
    BadParent { stmt: usize },

    /// An operand is used outside the region where it is defined.
    #[error("value {value} used by statement {stmt} does not dominate the use")]
    UndefinedValue { value: usize, stmt: usize },

    /// A dereferencing operation was given a non-memref value.
    #[error("'{op}' expects a memref operand, found {found}")]
    NotAMemRef { op: &'static str, found: String },

    /// Subscript count does not match the memref rank.
    #[error("'{op}' indexes a rank-{rank} memref with {found} subscripts")]
    SubscriptCount {
        op: &'static str,
        rank: usize,
        found: usize,
    },

    /// A subscript, bound operand, or element count is not of index type.
    #[error("'{op}' expects index operands, found {found}")]
    NotAnIndex { op: &'static str, found: String },

    /// An affine map's input count does not match its operand list.
    #[error("'{op}' applies a map with {expected} inputs to {found} operands")]
    MapArity {
        op: &'static str,
        expected: usize,
        found: usize,
    },

    /// `affine_apply` maps must produce exactly one result; bounds at least one.
    #[error("'{op}' has a map with {found} results")]
    MapResults { op: &'static str, found: usize },

    #[error("loop step must be positive")]
    ZeroStep,

    /// `alloc` only produces statically shaped memrefs.
    #[error("alloc of dynamically shaped {ty}")]
    DynamicAlloc { ty: String },
}
