//! Affine analyses over the dmagen IR: constraint systems, loop nest
//! queries, access classification, and memref region computation.

pub mod access;
pub mod constraints;
pub mod loops;
pub mod region;

pub use access::{AccessKind, classify_access};
pub use constraints::{BoundDifference, ConstraintError, FlatAffineConstraints};
pub use loops::{enclosing_loops, induction_vars, nesting_depth};
pub use region::{MemRefRegion, RegionError, compute_memref_region};
