//! IR emitters for runtime shape queries.
//!
//! Each helper emits one instruction through an [`Emitter`] and returns its value.
//! Extent tensors are `tensor<Si64 x ?>`, index scalars `tensor<Si64 x []>` and
//! predicates `tensor<I1 x []>`.

use crate::ir::{
    builder::Emitter,
    rewriter::RewriteError,
    spec::{
        AssertSpec, CompareSpec, ComparisonOp, ConstShapeSpec, ElementwiseBinaryOp, Operand,
        Operation, TensorLiteral, TensorSpec, ValueId, ValueType,
    },
    utils::{extent_tensor_spec, extent_tensor_spec_of_rank, index_spec, predicate_spec},
};

fn tensor(spec: TensorSpec) -> ValueType {
    ValueType::Tensor(spec)
}

/// Runtime extents of `value`.
pub fn shape_of(
    emitter: &mut dyn Emitter,
    value: impl Into<Operand>,
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::ShapeOf,
        vec![value.into()],
        tensor(extent_tensor_spec()),
    )
}

pub fn num_elements(
    emitter: &mut dyn Emitter,
    shape: impl Into<Operand>,
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::NumElements,
        vec![shape.into()],
        tensor(index_spec()),
    )
}

pub fn rank(emitter: &mut dyn Emitter, shape: impl Into<Operand>) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::ShapeRank,
        vec![shape.into()],
        tensor(index_spec()),
    )
}

/// `true` when every shape equals the first.
pub fn shapes_equal(
    emitter: &mut dyn Emitter,
    shapes: &[Operand],
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::ShapeEq,
        shapes.to_vec(),
        tensor(predicate_spec()),
    )
}

/// Combines shapes that are known to be equal; no runtime check is emitted.
pub fn any_shape(emitter: &mut dyn Emitter, shapes: &[Operand]) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::ShapeAny,
        shapes.to_vec(),
        tensor(extent_tensor_spec()),
    )
}

pub fn broadcast_shape(
    emitter: &mut dyn Emitter,
    shapes: &[Operand],
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::ShapeBroadcast,
        shapes.to_vec(),
        tensor(extent_tensor_spec()),
    )
}

/// Emits `minimum_broadcast_shapes` and returns one operand per reduced shape.
pub fn minimum_broadcast_shapes(
    emitter: &mut dyn Emitter,
    shapes: &[Operand],
) -> Result<Vec<Operand>, RewriteError> {
    let output = ValueType::Tuple(vec![tensor(extent_tensor_spec()); shapes.len()]);
    let tuple = emitter.emit(Operation::MinimumBroadcastShapes, shapes.to_vec(), output)?;
    Ok((0..shapes.len())
        .map(|index| Operand::TupleElement { tuple, index })
        .collect())
}

pub fn const_shape(emitter: &mut dyn Emitter, extents: &[usize]) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::ConstShape(ConstShapeSpec {
            extents: extents.to_vec(),
        }),
        Vec::new(),
        tensor(extent_tensor_spec_of_rank(extents.len())),
    )
}

/// Packs index scalars into an extent tensor of known length.
pub fn from_elements(
    emitter: &mut dyn Emitter,
    elements: &[Operand],
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::FromElements,
        elements.to_vec(),
        tensor(extent_tensor_spec_of_rank(elements.len())),
    )
}

pub fn dynamic_reshape(
    emitter: &mut dyn Emitter,
    value: impl Into<Operand>,
    shape: impl Into<Operand>,
    result: TensorSpec,
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::DynamicReshape,
        vec![value.into(), shape.into()],
        tensor(result),
    )
}

/// Refines or erases static type information without touching data.
pub fn tensor_cast(
    emitter: &mut dyn Emitter,
    value: impl Into<Operand>,
    result: TensorSpec,
) -> Result<ValueId, RewriteError> {
    emitter.emit(Operation::TensorCast, vec![value.into()], tensor(result))
}

pub fn index_constant(emitter: &mut dyn Emitter, value: i64) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::Constant(TensorLiteral::index_scalar(value)),
        Vec::new(),
        tensor(index_spec()),
    )
}

pub fn compare_index(
    emitter: &mut dyn Emitter,
    lhs: impl Into<Operand>,
    rhs: impl Into<Operand>,
    op: ComparisonOp,
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::Compare(CompareSpec { op }),
        vec![lhs.into(), rhs.into()],
        tensor(predicate_spec()),
    )
}

pub fn add_index(
    emitter: &mut dyn Emitter,
    lhs: impl Into<Operand>,
    rhs: impl Into<Operand>,
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::ElementwiseBinary(ElementwiseBinaryOp::Add),
        vec![lhs.into(), rhs.into()],
        tensor(index_spec()),
    )
}

pub fn select_index(
    emitter: &mut dyn Emitter,
    predicate: impl Into<Operand>,
    on_true: impl Into<Operand>,
    on_false: impl Into<Operand>,
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::Select,
        vec![predicate.into(), on_true.into(), on_false.into()],
        tensor(index_spec()),
    )
}

/// Emits a runtime assertion on `predicate`.
pub fn assert(
    emitter: &mut dyn Emitter,
    predicate: impl Into<Operand>,
    message: impl Into<String>,
) -> Result<ValueId, RewriteError> {
    emitter.emit(
        Operation::Assert(AssertSpec {
            message: message.into(),
        }),
        vec![predicate.into()],
        ValueType::unit(),
    )
}
