//! Type system: index, scalar, and memref types.

use std::fmt;

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Signless integer.
    Int,
    /// Floating point.
    Float,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const I8: Self = Self {
        kind: ScalarKind::Int,
        width: 1,
    };
    pub const I16: Self = Self {
        kind: ScalarKind::Int,
        width: 2,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Int,
        width: 4,
    };
    pub const I64: Self = Self {
        kind: ScalarKind::Int,
        width: 8,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };
    pub const F64: Self = Self {
        kind: ScalarKind::Float,
        width: 8,
    };

    /// Looks up a scalar by its textual name (`f32`, `i64`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "f16" => Self::F16,
            "f32" => Self::F32,
            "f64" => Self::F64,
            _ => return None,
        })
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Int => write!(f, "i{}", self.width as u32 * 8),
            ScalarKind::Float => write!(f, "f{}", self.width as u32 * 8),
        }
    }
}

/// One extent of a memref shape.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Dimension {
    /// Statically known extent.
    Fixed(u64),
    /// Extent only known at runtime (`?`).
    Dynamic,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Dynamic => f.write_str("?"),
        }
    }
}

/// A multi-dimensional buffer living in a numbered memory space.
///
/// Memory space 0 is the default (slow) space. Layout maps are not modeled;
/// every memref is dense and row-major.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct MemRefType {
    pub shape: Vec<Dimension>,
    pub element: Scalar,
    pub memory_space: u32,
}

impl MemRefType {
    /// A statically shaped memref.
    pub fn new(shape: &[u64], element: Scalar, memory_space: u32) -> Self {
        Self {
            shape: shape.iter().map(|&n| Dimension::Fixed(n)).collect(),
            element,
            memory_space,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn has_static_shape(&self) -> bool {
        self.shape.iter().all(|d| matches!(d, Dimension::Fixed(_)))
    }

    /// Total element count, if the shape is static and does not overflow.
    pub fn num_elements(&self) -> Option<u64> {
        self.shape.iter().try_fold(1u64, |acc, dim| match dim {
            Dimension::Fixed(n) => acc.checked_mul(*n),
            Dimension::Dynamic => None,
        })
    }

    pub fn size_in_bytes(&self) -> Option<u64> {
        self.num_elements()?.checked_mul(u64::from(self.element.width))
    }
}

impl fmt::Display for MemRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memref<")?;
        for dim in &self.shape {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}", self.element)?;
        if self.memory_space != 0 {
            write!(f, ", {}", self.memory_space)?;
        }
        f.write_str(">")
    }
}

/// The type of an SSA value.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Type {
    /// Machine-word integer used for loop variables and subscripts.
    Index,
    Scalar(Scalar),
    MemRef(MemRefType),
}

impl Type {
    pub fn as_memref(&self) -> Option<&MemRefType> {
        match self {
            Self::MemRef(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => f.write_str("index"),
            Self::Scalar(s) => write!(f, "{s}"),
            Self::MemRef(m) => write!(f, "{m}"),
        }
    }
}
