//! Statement builder positioned at an insertion point.

use crate::affine::AffineMap;
use crate::arena::Handle;
use crate::func::Function;
use crate::stmt::{
    AffineBound, BinaryOp, ForStmt, Operation, Statement, StatementKind, Value, ValueDef,
};
use crate::types::{MemRefType, Scalar, Type};

/// Where the next statement goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertPoint {
    /// Immediately before the given statement.
    Before(Handle<Statement>),
    /// Immediately after the given statement.
    After(Handle<Statement>),
    /// At the start of the block owned by the given loop (`None`: function body).
    BlockStart(Option<Handle<Statement>>),
    /// At the end of the block owned by the given loop (`None`: function body).
    BlockEnd(Option<Handle<Statement>>),
}

/// Creates statements at an [`InsertPoint`].
///
/// Successive insertions through one builder appear in creation order: a
/// builder placed after a statement advances past everything it inserts.
/// The builder does not borrow the function, so several builders can be
/// alive at once and used alternately.
#[derive(Clone, Debug)]
pub struct Builder {
    point: InsertPoint,
}

impl Builder {
    pub fn new(point: InsertPoint) -> Self {
        Self { point }
    }

    pub fn before(stmt: Handle<Statement>) -> Self {
        Self::new(InsertPoint::Before(stmt))
    }

    pub fn after(stmt: Handle<Statement>) -> Self {
        Self::new(InsertPoint::After(stmt))
    }

    pub fn at_start(parent: Option<Handle<Statement>>) -> Self {
        Self::new(InsertPoint::BlockStart(parent))
    }

    pub fn at_end(parent: Option<Handle<Statement>>) -> Self {
        Self::new(InsertPoint::BlockEnd(parent))
    }

    pub fn insertion_point(&self) -> InsertPoint {
        self.point
    }

    fn resolve(&self, func: &Function) -> (Option<Handle<Statement>>, usize) {
        let anchor_position = |anchor: Handle<Statement>| {
            func.position_in_block(anchor).unwrap_or_else(|| {
                panic!("insertion anchor {anchor:?} is not attached to its parent block")
            })
        };
        match self.point {
            InsertPoint::Before(anchor) => (func.parent(anchor), anchor_position(anchor)),
            InsertPoint::After(anchor) => (func.parent(anchor), anchor_position(anchor) + 1),
            InsertPoint::BlockStart(parent) => (parent, 0),
            InsertPoint::BlockEnd(parent) => (parent, func.block(parent).len()),
        }
    }

    /// Inserts a statement and returns its handle.
    pub fn insert(&mut self, func: &mut Function, kind: StatementKind) -> Handle<Statement> {
        let (parent, index) = self.resolve(func);
        let stmt = func.statements.append(Statement { kind, parent });
        func.block_mut(parent).insert(index, stmt);
        if matches!(
            self.point,
            InsertPoint::After(_) | InsertPoint::BlockStart(_)
        ) {
            self.point = InsertPoint::After(stmt);
        }
        stmt
    }

    /// Inserts an operation without a result.
    pub fn op(&mut self, func: &mut Function, op: Operation) -> Handle<Statement> {
        self.insert(func, StatementKind::Op(op))
    }

    fn op_with_result(
        &mut self,
        func: &mut Function,
        ty: Type,
        make: impl FnOnce(Handle<Value>) -> Operation,
    ) -> Handle<Value> {
        let stmt = func.statements.next_handle();
        let result = func.values.append(Value {
            name: None,
            ty,
            def: ValueDef::Result(stmt),
        });
        let inserted = self.op(func, make(result));
        debug_assert_eq!(inserted, stmt);
        result
    }

    pub fn constant_index(&mut self, func: &mut Function, value: i64) -> Handle<Value> {
        self.op_with_result(func, Type::Index, |result| Operation::Constant {
            result,
            value,
        })
    }

    pub fn affine_apply(
        &mut self,
        func: &mut Function,
        map: AffineMap,
        operands: Vec<Handle<Value>>,
    ) -> Handle<Value> {
        self.op_with_result(func, Type::Index, |result| Operation::AffineApply {
            result,
            map,
            operands,
        })
    }

    pub fn alloc(&mut self, func: &mut Function, ty: MemRefType) -> Handle<Value> {
        self.op_with_result(func, Type::MemRef(ty), |result| Operation::Alloc { result })
    }

    pub fn dealloc(&mut self, func: &mut Function, memref: Handle<Value>) -> Handle<Statement> {
        self.op(func, Operation::Dealloc { memref })
    }

    /// Loads one element; the result has the memref's element type.
    pub fn load(
        &mut self,
        func: &mut Function,
        memref: Handle<Value>,
        indices: Vec<Handle<Value>>,
    ) -> Handle<Value> {
        let element = func
            .memref_type(memref)
            .map_or(Scalar::F32, |ty| ty.element);
        self.op_with_result(func, Type::Scalar(element), |result| Operation::Load {
            result,
            memref,
            indices,
        })
    }

    pub fn store(
        &mut self,
        func: &mut Function,
        value: Handle<Value>,
        memref: Handle<Value>,
        indices: Vec<Handle<Value>>,
    ) -> Handle<Statement> {
        self.op(
            func,
            Operation::Store {
                value,
                memref,
                indices,
            },
        )
    }

    pub fn dma_wait(
        &mut self,
        func: &mut Function,
        tag: Handle<Value>,
        tag_indices: Vec<Handle<Value>>,
        num_elements: Handle<Value>,
    ) -> Handle<Statement> {
        self.op(
            func,
            Operation::DmaWait {
                tag,
                tag_indices,
                num_elements,
            },
        )
    }

    /// Scalar arithmetic; the result takes the type of `lhs`.
    pub fn binary(
        &mut self,
        func: &mut Function,
        op: BinaryOp,
        lhs: Handle<Value>,
        rhs: Handle<Value>,
    ) -> Handle<Value> {
        let ty = func.value_type(lhs).clone();
        self.op_with_result(func, ty, |result| Operation::Binary {
            result,
            op,
            lhs,
            rhs,
        })
    }

    pub fn ret(&mut self, func: &mut Function) -> Handle<Statement> {
        self.op(func, Operation::Return)
    }

    /// Inserts an empty loop and returns it with its induction variable.
    /// Fill the body through `Builder::at_end(Some(loop))`.
    pub fn for_loop(
        &mut self,
        func: &mut Function,
        lower: AffineBound,
        upper: AffineBound,
        step: u64,
    ) -> (Handle<Statement>, Handle<Value>) {
        let stmt = func.statements.next_handle();
        let induction_var = func.values.append(Value {
            name: None,
            ty: Type::Index,
            def: ValueDef::InductionVar(stmt),
        });
        let inserted = self.insert(
            func,
            StatementKind::For(ForStmt {
                induction_var,
                lower,
                upper,
                step,
                body: Vec::new(),
            }),
        );
        debug_assert_eq!(inserted, stmt);
        (stmt, induction_var)
    }
}
