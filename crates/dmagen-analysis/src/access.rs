//! Classification of operations by how they touch memory.

use dmagen_ir::{Handle, Operation, Value};

/// How an operation accesses a memref.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind<'a> {
    /// A `load`.
    Read {
        memref: Handle<Value>,
        indices: &'a [Handle<Value>],
    },
    /// A `store`.
    Write {
        memref: Handle<Value>,
        indices: &'a [Handle<Value>],
    },
    /// Anything else, including DMA operations.
    Other,
}

impl<'a> AccessKind<'a> {
    pub fn memref(&self) -> Option<Handle<Value>> {
        match *self {
            Self::Read { memref, .. } | Self::Write { memref, .. } => Some(memref),
            Self::Other => None,
        }
    }

    pub fn indices(&self) -> &'a [Handle<Value>] {
        match *self {
            Self::Read { indices, .. } | Self::Write { indices, .. } => indices,
            Self::Other => &[],
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. })
    }
}

/// Classifies `op` as a read, a write, or neither.
pub fn classify_access(op: &Operation) -> AccessKind<'_> {
    match op {
        Operation::Load {
            memref, indices, ..
        } => AccessKind::Read {
            memref: *memref,
            indices,
        },
        Operation::Store {
            memref, indices, ..
        } => AccessKind::Write {
            memref: *memref,
            indices,
        },
        _ => AccessKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmagen_ir::{Builder, Function, MemRefType, Scalar, Type};

    #[test]
    fn load_store_and_other() {
        let mut f = Function::new("f");
        let a = f.add_argument("A", Type::MemRef(MemRefType::new(&[4], Scalar::F32, 0)));
        let mut b = Builder::at_end(None);
        let c = b.constant_index(&mut f, 0);
        let v = b.load(&mut f, a, vec![c]);
        let store = b.store(&mut f, v, a, vec![c]);
        let load = f.defining_statement(v).unwrap();
        let constant = f.defining_statement(c).unwrap();

        let read = classify_access(f.as_op(load).unwrap());
        assert_eq!(read.memref(), Some(a));
        assert_eq!(read.indices(), &[c]);
        assert!(!read.is_write());

        let write = classify_access(f.as_op(store).unwrap());
        assert!(write.is_write());
        assert_eq!(write.memref(), Some(a));

        let other = classify_access(f.as_op(constant).unwrap());
        assert_eq!(other, AccessKind::Other);
        assert!(other.indices().is_empty());
    }
}
