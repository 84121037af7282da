use std::collections::HashMap;
use std::sync::Arc;

use rankspec::ir::spec::{
    BackendError, BackendResult, CastSpec, CompareSpec, ComparisonOp, DType, Dimension,
    ElementwiseBinaryOp, ElementwiseUnaryOp, Function, Instruction, Operand, Operation,
    PortableBackend, Shape, SpecErrorCode, TensorInit, TensorLiteral, TensorShape, TensorSpec,
    ValueId, ValueType,
};
use rankspec::ir::utils::tensor_spec_static;
use rankspec::shape::{self as extents, ShapeError};
use tracing::trace;

/// Dense host tensor. `spec` is always ranked with static extents.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor {
    pub spec: TensorSpec,
    pub data: TensorData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Arc<[u8]>),
    Si32(Arc<[i32]>),
    Si64(Arc<[i64]>),
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Bool(_) => DType::I1,
            TensorData::Si32(_) => DType::Si32,
            TensorData::Si64(_) => DType::Si64,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(values) => values.len(),
            TensorData::Si32(values) => values.len(),
            TensorData::Si64(values) => values.len(),
            TensorData::F32(values) => values.len(),
            TensorData::F64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a new buffer from the elements at `indices`.
    fn gather(&self, indices: &[usize]) -> TensorData {
        match self {
            TensorData::Bool(values) => TensorData::Bool(pick(values, indices)),
            TensorData::Si32(values) => TensorData::Si32(pick(values, indices)),
            TensorData::Si64(values) => TensorData::Si64(pick(values, indices)),
            TensorData::F32(values) => TensorData::F32(pick(values, indices)),
            TensorData::F64(values) => TensorData::F64(pick(values, indices)),
        }
    }
}

fn pick<T: Copy>(values: &[T], indices: &[usize]) -> Arc<[T]> {
    indices.iter().map(|&index| values[index]).collect()
}

impl CpuTensor {
    fn from_parts(dims: &[usize], data: TensorData) -> BackendResult<Self> {
        let expected = extents::num_elements(dims).map_err(shape_error)?;
        if expected != data.len() {
            return Err(BackendError::spec(
                SpecErrorCode::ShapeMismatch,
                format!(
                    "{} elements do not fill shape {:?}",
                    data.len(),
                    dims
                ),
            ));
        }
        Ok(Self {
            spec: tensor_spec_static(data.dtype(), dims),
            data,
        })
    }

    pub fn f32(dims: &[usize], values: &[f32]) -> BackendResult<Self> {
        Self::from_parts(dims, TensorData::F32(Arc::from(values)))
    }

    pub fn f64(dims: &[usize], values: &[f64]) -> BackendResult<Self> {
        Self::from_parts(dims, TensorData::F64(Arc::from(values)))
    }

    pub fn i32(dims: &[usize], values: &[i32]) -> BackendResult<Self> {
        Self::from_parts(dims, TensorData::Si32(Arc::from(values)))
    }

    pub fn i64(dims: &[usize], values: &[i64]) -> BackendResult<Self> {
        Self::from_parts(dims, TensorData::Si64(Arc::from(values)))
    }

    pub fn bool(dims: &[usize], values: &[bool]) -> BackendResult<Self> {
        let bytes = values.iter().map(|&flag| flag as u8).collect::<Arc<[u8]>>();
        Self::from_parts(dims, TensorData::Bool(bytes))
    }

    pub fn dims(&self) -> BackendResult<Vec<usize>> {
        match &self.spec.shape {
            TensorShape::Ranked(shape) => static_dims(shape),
            TensorShape::Unranked => Err(BackendError::execution(
                "runtime tensor carries an unranked type",
            )),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            TensorData::F64(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            TensorData::Si32(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::Si64(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<Vec<bool>> {
        match &self.data {
            TensorData::Bool(values) => Some(values.iter().map(|&flag| flag != 0).collect()),
            _ => None,
        }
    }
}

/// Interpreter for rankspec programs on host memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuPortableBackend;

impl CpuPortableBackend {
    pub fn new() -> Self {
        Self
    }

    fn run_block(
        &self,
        function_name: &str,
        body: &[Instruction],
        values: &mut HashMap<ValueId, Vec<CpuTensor>>,
    ) -> BackendResult<()> {
        for (instr_index, instruction) in body.iter().enumerate() {
            if let Operation::Cond(spec) = &instruction.op {
                let predicate = match instruction.operands.as_slice() {
                    [operand] => read_predicate(&resolve_operand(values, operand)?)?,
                    _ => return Err(BackendError::execution("cond expects one predicate")),
                };
                let region = if predicate {
                    &spec.then_region
                } else {
                    &spec.else_region
                };
                trace!(
                    function = function_name,
                    id = instruction.id.0,
                    predicate,
                    "cond"
                );
                self.run_block(function_name, &region.body, values)?;
                let [result] = region.result_ids.as_slice() else {
                    return Err(BackendError::spec(
                        SpecErrorCode::RegionSignatureMismatch,
                        format!("cond region yields {} values", region.result_ids.len()),
                    ));
                };
                let yielded = resolve_operand(values, &Operand::Value(*result))?;
                check_outputs(&instruction.output, std::slice::from_ref(&yielded))?;
                values.insert(instruction.id, vec![yielded]);
                continue;
            }

            let mut inputs = Vec::with_capacity(instruction.operands.len());
            for operand in &instruction.operands {
                inputs.push(resolve_operand(values, operand)?);
            }
            let outputs = self.execute_instruction(instruction, &inputs).map_err(|err| {
                augment_backend_error(err, function_name, instr_index, instruction, &inputs)
            })?;
            values.insert(instruction.id, outputs);
        }
        Ok(())
    }
}

impl PortableBackend for CpuPortableBackend {
    type TensorHandle = CpuTensor;

    fn backend_name(&self) -> &str {
        "cpu-portable"
    }

    fn materialize(&self, init: TensorInit) -> BackendResult<Self::TensorHandle> {
        match init {
            TensorInit::Literal(lit) => literal_to_tensor(&lit),
            TensorInit::Zeroed(spec) => zeroed_tensor(&spec),
        }
    }

    fn to_literal(&self, tensor: &Self::TensorHandle) -> BackendResult<TensorLiteral> {
        Ok(tensor_to_literal(tensor))
    }

    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        trace!(
            op = instruction.op.mnemonic(),
            id = instruction.id.0,
            "execute"
        );
        let outputs = execute_operation(instruction, inputs)?;
        check_outputs(&instruction.output, &outputs)?;
        Ok(outputs)
    }

    fn run_function(
        &self,
        function: &Function,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        if function.parameter_ids.len() != inputs.len() {
            return Err(BackendError::execution(format!(
                "function `{}` expects {} inputs, got {}",
                function.name,
                function.parameter_ids.len(),
                inputs.len()
            )));
        }

        let mut values: HashMap<ValueId, Vec<CpuTensor>> = HashMap::new();
        for ((param_id, ty), handle) in function
            .parameter_ids
            .iter()
            .zip(&function.parameters)
            .zip(inputs)
        {
            check_outputs(ty, std::slice::from_ref(handle))?;
            values.insert(*param_id, vec![handle.clone()]);
        }

        self.run_block(&function.name, &function.body, &mut values)?;

        let mut results = Vec::with_capacity(function.result_ids.len());
        for id in &function.result_ids {
            results.push(resolve_operand(&values, &Operand::Value(*id))?);
        }
        Ok(results)
    }
}

fn resolve_operand(
    values: &HashMap<ValueId, Vec<CpuTensor>>,
    operand: &Operand,
) -> BackendResult<CpuTensor> {
    match operand {
        Operand::Value(id) => match values.get(id).map(Vec::as_slice) {
            Some([tensor]) => Ok(tensor.clone()),
            Some(_) => Err(BackendError::execution(format!(
                "value %{} is not a single tensor",
                id.0
            ))),
            None => Err(BackendError::execution(format!(
                "operand value %{} missing",
                id.0
            ))),
        },
        Operand::TupleElement { tuple, index } => values
            .get(tuple)
            .and_then(|elements| elements.get(*index))
            .cloned()
            .ok_or_else(|| {
                BackendError::execution(format!("tuple element %{}#{} missing", tuple.0, index))
            }),
        Operand::Literal(lit) => literal_to_tensor(lit),
    }
}

/// Checks runtime tensors against the declared result type of an instruction.
fn check_outputs(declared: &ValueType, outputs: &[CpuTensor]) -> BackendResult<()> {
    match declared {
        ValueType::Tensor(spec) => match outputs {
            [tensor] => check_tensor(spec, tensor),
            _ => Err(BackendError::execution(format!(
                "expected one tensor result, got {}",
                outputs.len()
            ))),
        },
        ValueType::Tuple(elements) => {
            if elements.len() != outputs.len() {
                return Err(BackendError::execution(format!(
                    "expected {} tuple elements, got {}",
                    elements.len(),
                    outputs.len()
                )));
            }
            for (element, tensor) in elements.iter().zip(outputs) {
                check_outputs(element, std::slice::from_ref(tensor))?;
            }
            Ok(())
        }
    }
}

fn check_tensor(declared: &TensorSpec, tensor: &CpuTensor) -> BackendResult<()> {
    if declared.dtype != tensor.spec.dtype {
        return Err(BackendError::spec(
            SpecErrorCode::DTypeMismatch,
            format!(
                "declared {:?}, produced {:?}",
                declared.dtype, tensor.spec.dtype
            ),
        ));
    }
    let Some(shape) = declared.ranked_shape() else {
        return Ok(());
    };
    let dims = tensor.dims()?;
    if shape.rank() != dims.len() {
        return Err(BackendError::spec(
            SpecErrorCode::RankMismatch,
            format!("declared rank {}, produced {:?}", shape.rank(), dims),
        ));
    }
    for (axis, (dim, actual)) in shape.dims().iter().zip(&dims).enumerate() {
        if let Dimension::Static(expected) = dim {
            if expected != actual {
                return Err(BackendError::spec(
                    SpecErrorCode::ShapeMismatch,
                    format!("axis {axis}: declared {expected}, produced {actual}"),
                ));
            }
        }
    }
    Ok(())
}

fn literal_to_tensor(literal: &TensorLiteral) -> BackendResult<CpuTensor> {
    let shape = literal.spec.ranked_shape().ok_or_else(|| {
        BackendError::spec(
            SpecErrorCode::InvalidExtent,
            "literal must be ranked".to_string(),
        )
    })?;
    let dims = static_dims(shape)?;
    let data = match literal.spec.dtype {
        DType::I1 => TensorData::Bool(Arc::clone(&literal.bytes)),
        DType::Si32 => TensorData::Si32(Arc::from(bytes_to_i32(&literal.bytes)?)),
        DType::Si64 => TensorData::Si64(Arc::from(bytes_to_i64(&literal.bytes)?)),
        DType::F32 => TensorData::F32(Arc::from(bytes_to_f32(&literal.bytes)?)),
        DType::F64 => TensorData::F64(Arc::from(bytes_to_f64(&literal.bytes)?)),
    };
    CpuTensor::from_parts(&dims, data)
}

fn zeroed_tensor(spec: &TensorSpec) -> BackendResult<CpuTensor> {
    let shape = spec.ranked_shape().ok_or_else(|| {
        BackendError::spec(
            SpecErrorCode::InvalidExtent,
            "zero init requires a ranked type".to_string(),
        )
    })?;
    let dims = static_dims(shape)?;
    let count = extents::num_elements(&dims).map_err(shape_error)?;
    let data = match spec.dtype {
        DType::I1 => TensorData::Bool(Arc::from(vec![0u8; count])),
        DType::Si32 => TensorData::Si32(Arc::from(vec![0i32; count])),
        DType::Si64 => TensorData::Si64(Arc::from(vec![0i64; count])),
        DType::F32 => TensorData::F32(Arc::from(vec![0f32; count])),
        DType::F64 => TensorData::F64(Arc::from(vec![0f64; count])),
    };
    CpuTensor::from_parts(&dims, data)
}

fn tensor_to_literal(tensor: &CpuTensor) -> TensorLiteral {
    let bytes = match &tensor.data {
        TensorData::Bool(values) => Arc::clone(values),
        TensorData::Si32(values) => to_le_bytes(values, |value| value.to_le_bytes()),
        TensorData::Si64(values) => to_le_bytes(values, |value| value.to_le_bytes()),
        TensorData::F32(values) => to_le_bytes(values, |value| value.to_le_bytes()),
        TensorData::F64(values) => to_le_bytes(values, |value| value.to_le_bytes()),
    };
    TensorLiteral::new(tensor.spec.clone(), bytes)
}

fn execute_operation(
    instruction: &Instruction,
    inputs: &[CpuTensor],
) -> BackendResult<Vec<CpuTensor>> {
    let result = match &instruction.op {
        Operation::Constant(literal) => literal_to_tensor(literal)?,
        Operation::ElementwiseUnary(op) => op_elementwise_unary(inputs, *op)?,
        Operation::ElementwiseBinary(op) => {
            let (dims, data) = same_shape_operands(inputs, 2)?;
            CpuTensor::from_parts(&dims, binary_kernel(*op, &data[0], &data[1])?)?
        }
        Operation::Compare(spec) => {
            let (dims, data) = same_shape_operands(inputs, 2)?;
            CpuTensor::from_parts(&dims, compare_kernel(spec, &data[0], &data[1])?)?
        }
        Operation::Select => {
            let (dims, data) = same_shape_operands(inputs, 3)?;
            CpuTensor::from_parts(&dims, select_kernel(&data[0], &data[1], &data[2])?)?
        }
        Operation::Cast(spec) => op_cast(inputs, spec)?,
        Operation::BroadcastBinary(op) => {
            let (dims, data) = broadcast_operands(inputs, 2)?;
            CpuTensor::from_parts(&dims, binary_kernel(*op, &data[0], &data[1])?)?
        }
        Operation::BroadcastCompare(spec) => {
            let (dims, data) = broadcast_operands(inputs, 2)?;
            CpuTensor::from_parts(&dims, compare_kernel(spec, &data[0], &data[1])?)?
        }
        Operation::BroadcastSelect => {
            let (dims, data) = broadcast_operands(inputs, 3)?;
            CpuTensor::from_parts(&dims, select_kernel(&data[0], &data[1], &data[2])?)?
        }
        Operation::ShapeOf => {
            let dims = expect_single(inputs)?.dims()?;
            extent_tensor(&dims)?
        }
        Operation::NumElements => {
            let shape = read_extents(expect_single(inputs)?)?;
            let count = extents::num_elements(&shape).map_err(shape_error)?;
            index_tensor(count)?
        }
        Operation::ShapeRank => index_tensor(read_extents(expect_single(inputs)?)?.len())?,
        Operation::ShapeEq => {
            let shapes = read_all_extents(inputs)?;
            let equal = shapes
                .split_first()
                .map_or(true, |(first, rest)| rest.iter().all(|shape| shape == first));
            CpuTensor::bool(&[], &[equal])?
        }
        Operation::ShapeAny => {
            let shapes = read_all_extents(inputs)?;
            let first = shapes
                .first()
                .ok_or_else(|| BackendError::execution("shape_any expects at least one shape"))?;
            extent_tensor(first)?
        }
        Operation::ShapeBroadcast => {
            let shapes = read_all_extents(inputs)?;
            let broadcast = extents::broadcast_shapes(&shapes).map_err(|err| {
                BackendError::execution(format!("shape_broadcast failed: {err}"))
            })?;
            extent_tensor(&broadcast)?
        }
        Operation::MinimumBroadcastShapes => {
            let shapes = read_all_extents(inputs)?;
            return extents::minimum_broadcast_shapes(&shapes)
                .iter()
                .map(|shape| extent_tensor(shape))
                .collect();
        }
        Operation::ConstShape(spec) => extent_tensor(&spec.extents)?,
        Operation::FromElements => {
            let mut elements = Vec::with_capacity(inputs.len());
            for input in inputs {
                elements.push(read_index(input)?);
            }
            CpuTensor::i64(&[elements.len()], &elements)?
        }
        Operation::DynamicReshape => {
            let [value, shape] = inputs else {
                return Err(BackendError::execution(
                    "dynamic_reshape expects value and shape operands",
                ));
            };
            let dims = read_extents(shape)?;
            CpuTensor::from_parts(&dims, value.data.clone())?
        }
        Operation::TensorCast => expect_single(inputs)?.clone(),
        Operation::Assert(spec) => {
            if !read_predicate(expect_single(inputs)?)? {
                return Err(BackendError::assertion(spec.message.clone()));
            }
            return Ok(Vec::new());
        }
        Operation::Cond(_) => {
            return Err(BackendError::unimplemented(
                "cond",
                "regions are executed by run_function",
            ))
        }
    };
    Ok(vec![result])
}

fn shape_error(err: ShapeError) -> BackendError {
    BackendError::spec(SpecErrorCode::InvalidExtent, err.to_string())
}

fn augment_backend_error(
    error: BackendError,
    function_name: &str,
    instruction_index: usize,
    instruction: &Instruction,
    inputs: &[CpuTensor],
) -> BackendError {
    let location = format!(
        "at function `{}` instruction #{}, {} id %{} operands [{}]",
        function_name,
        instruction_index,
        instruction.op.mnemonic(),
        instruction.id.0,
        format_operands(&instruction.operands, inputs)
    );
    match error {
        BackendError::Execution { message } => BackendError::Execution {
            message: format!("{message} ({location})"),
        },
        BackendError::Unimplemented { op, reason } => BackendError::Unimplemented {
            op,
            reason: format!("{reason} ({location})"),
        },
        other => other,
    }
}

fn format_operands(operands: &[Operand], inputs: &[CpuTensor]) -> String {
    if operands.is_empty() {
        return String::from("<none>");
    }

    operands
        .iter()
        .zip(inputs.iter())
        .map(|(operand, tensor)| {
            let shape_desc = match tensor.dims() {
                Ok(dims) => format!("{dims:?}"),
                Err(_) => String::from("dynamic"),
            };
            match operand {
                Operand::Value(id) => format!("%{} {} {:?}", id.0, shape_desc, tensor.spec.dtype),
                Operand::TupleElement { tuple, index } => {
                    format!("%{}#{index} {shape_desc} {:?}", tuple.0, tensor.spec.dtype)
                }
                Operand::Literal(_) => format!("literal {} {:?}", shape_desc, tensor.spec.dtype),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn same_shape_operands(
    inputs: &[CpuTensor],
    arity: usize,
) -> BackendResult<(Vec<usize>, Vec<TensorData>)> {
    if inputs.len() != arity {
        return Err(BackendError::execution(format!(
            "operation expects {arity} operands, got {}",
            inputs.len()
        )));
    }
    let dims = inputs[0].dims()?;
    for input in &inputs[1..] {
        let other = input.dims()?;
        if other != dims {
            return Err(BackendError::spec(
                SpecErrorCode::ShapeMismatch,
                format!("element-wise operands {dims:?} and {other:?}"),
            ));
        }
    }
    let data = inputs.iter().map(|input| input.data.clone()).collect();
    Ok((dims, data))
}

/// Broadcasts every operand to the common shape, numpy style.
fn broadcast_operands(
    inputs: &[CpuTensor],
    arity: usize,
) -> BackendResult<(Vec<usize>, Vec<TensorData>)> {
    if inputs.len() != arity {
        return Err(BackendError::execution(format!(
            "operation expects {arity} operands, got {}",
            inputs.len()
        )));
    }
    let mut shapes = Vec::with_capacity(inputs.len());
    for input in inputs {
        shapes.push(input.dims()?);
    }
    let out_dims = extents::broadcast_shapes(&shapes)
        .map_err(|err| BackendError::execution(format!("operands do not broadcast: {err}")))?;
    let mut data = Vec::with_capacity(inputs.len());
    for (input, dims) in inputs.iter().zip(&shapes) {
        if *dims == out_dims {
            data.push(input.data.clone());
        } else {
            data.push(input.data.gather(&broadcast_indices(dims, &out_dims)?));
        }
    }
    Ok((out_dims, data))
}

/// Source offsets for every element of `out_dims`, reading `src_dims` with stretched unit axes.
fn broadcast_indices(src_dims: &[usize], out_dims: &[usize]) -> BackendResult<Vec<usize>> {
    let padded = extents::broadcast_to_rank(src_dims, out_dims.len()).map_err(|err| {
        BackendError::spec(SpecErrorCode::BroadcastIncompatible, err.to_string())
    })?;
    let mut strides = compute_strides(&padded);
    for (axis, (&src, &out)) in padded.iter().zip(out_dims).enumerate() {
        if src == out {
            continue;
        }
        if src != 1 {
            return Err(BackendError::spec(
                SpecErrorCode::BroadcastIncompatible,
                format!("cannot broadcast {src_dims:?} to {out_dims:?}"),
            ));
        }
        strides[axis] = 0;
    }
    Ok(MultiIndex::new(out_dims)
        .map(|coords| {
            coords
                .iter()
                .zip(&strides)
                .map(|(coord, stride)| coord * stride)
                .sum::<usize>()
        })
        .collect())
}

fn unsupported(op: &'static str, detail: String) -> BackendError {
    BackendError::spec(SpecErrorCode::DTypeNotSupported, format!("{op}: {detail}"))
}

fn zip_with<T: Copy, U>(
    lhs: &[T],
    rhs: &[T],
    f: impl Fn(T, T) -> BackendResult<U>,
) -> BackendResult<Arc<[U]>> {
    if lhs.len() != rhs.len() {
        return Err(BackendError::execution("element-wise size mismatch"));
    }
    lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect()
}

macro_rules! float_binary {
    ($name:ident, $ty:ty) => {
        fn $name(op: ElementwiseBinaryOp, a: $ty, b: $ty) -> BackendResult<$ty> {
            Ok(match op {
                ElementwiseBinaryOp::Add => a + b,
                ElementwiseBinaryOp::Sub => a - b,
                ElementwiseBinaryOp::Mul => a * b,
                ElementwiseBinaryOp::Div => a / b,
                ElementwiseBinaryOp::Rem => a % b,
                ElementwiseBinaryOp::Pow => a.powf(b),
                ElementwiseBinaryOp::Maximum => a.max(b),
                ElementwiseBinaryOp::Minimum => a.min(b),
                ElementwiseBinaryOp::Atan2 => a.atan2(b),
                ElementwiseBinaryOp::And | ElementwiseBinaryOp::Or | ElementwiseBinaryOp::Xor => {
                    return Err(unsupported(
                        "elementwise_binary",
                        format!("{op:?} on floating point values"),
                    ))
                }
            })
        }
    };
}

macro_rules! int_binary {
    ($name:ident, $ty:ty) => {
        fn $name(op: ElementwiseBinaryOp, a: $ty, b: $ty) -> BackendResult<$ty> {
            Ok(match op {
                ElementwiseBinaryOp::Add => a.wrapping_add(b),
                ElementwiseBinaryOp::Sub => a.wrapping_sub(b),
                ElementwiseBinaryOp::Mul => a.wrapping_mul(b),
                ElementwiseBinaryOp::Div | ElementwiseBinaryOp::Rem if b == 0 => {
                    return Err(BackendError::spec(
                        SpecErrorCode::IntegerDivideByZero,
                        format!("{a} by zero"),
                    ))
                }
                ElementwiseBinaryOp::Div => a.wrapping_div(b),
                ElementwiseBinaryOp::Rem => a.wrapping_rem(b),
                ElementwiseBinaryOp::Pow => match u32::try_from(b) {
                    Ok(exponent) => a.wrapping_pow(exponent),
                    // Negative exponents truncate towards zero except for unit bases.
                    Err(_) if a == 1 => 1,
                    Err(_) if a == -1 => {
                        if b % 2 == 0 {
                            1
                        } else {
                            -1
                        }
                    }
                    Err(_) => 0,
                },
                ElementwiseBinaryOp::Maximum => a.max(b),
                ElementwiseBinaryOp::Minimum => a.min(b),
                ElementwiseBinaryOp::And => a & b,
                ElementwiseBinaryOp::Or => a | b,
                ElementwiseBinaryOp::Xor => a ^ b,
                ElementwiseBinaryOp::Atan2 => {
                    return Err(unsupported(
                        "elementwise_binary",
                        "atan2 on integer values".to_string(),
                    ))
                }
            })
        }
    };
}

float_binary!(binary_f32, f32);
float_binary!(binary_f64, f64);
int_binary!(binary_i32, i32);
int_binary!(binary_i64, i64);

fn binary_bool(op: ElementwiseBinaryOp, a: u8, b: u8) -> BackendResult<u8> {
    let (a, b) = (a != 0, b != 0);
    let value = match op {
        ElementwiseBinaryOp::And | ElementwiseBinaryOp::Minimum => a && b,
        ElementwiseBinaryOp::Or | ElementwiseBinaryOp::Maximum => a || b,
        ElementwiseBinaryOp::Xor => a ^ b,
        other => {
            return Err(unsupported(
                "elementwise_binary",
                format!("{other:?} on i1 values"),
            ))
        }
    };
    Ok(value as u8)
}

fn binary_kernel(
    op: ElementwiseBinaryOp,
    lhs: &TensorData,
    rhs: &TensorData,
) -> BackendResult<TensorData> {
    Ok(match (lhs, rhs) {
        (TensorData::F32(a), TensorData::F32(b)) => {
            TensorData::F32(zip_with(a, b, |x, y| binary_f32(op, x, y))?)
        }
        (TensorData::F64(a), TensorData::F64(b)) => {
            TensorData::F64(zip_with(a, b, |x, y| binary_f64(op, x, y))?)
        }
        (TensorData::Si32(a), TensorData::Si32(b)) => {
            TensorData::Si32(zip_with(a, b, |x, y| binary_i32(op, x, y))?)
        }
        (TensorData::Si64(a), TensorData::Si64(b)) => {
            TensorData::Si64(zip_with(a, b, |x, y| binary_i64(op, x, y))?)
        }
        (TensorData::Bool(a), TensorData::Bool(b)) => {
            TensorData::Bool(zip_with(a, b, |x, y| binary_bool(op, x, y))?)
        }
        (a, b) => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeMismatch,
                format!("{:?} and {:?}", a.dtype(), b.dtype()),
            ))
        }
    })
}

fn compare<T: PartialOrd>(op: ComparisonOp, a: T, b: T) -> BackendResult<u8> {
    let flag = match op {
        ComparisonOp::Less => a < b,
        ComparisonOp::LessEqual => a <= b,
        ComparisonOp::Equal => a == b,
        ComparisonOp::GreaterEqual => a >= b,
        ComparisonOp::Greater => a > b,
        ComparisonOp::NotEqual => a != b,
    };
    Ok(flag as u8)
}

fn compare_kernel(
    spec: &CompareSpec,
    lhs: &TensorData,
    rhs: &TensorData,
) -> BackendResult<TensorData> {
    let op = spec.op;
    let flags = match (lhs, rhs) {
        (TensorData::F32(a), TensorData::F32(b)) => zip_with(a, b, |x, y| compare(op, x, y))?,
        (TensorData::F64(a), TensorData::F64(b)) => zip_with(a, b, |x, y| compare(op, x, y))?,
        (TensorData::Si32(a), TensorData::Si32(b)) => zip_with(a, b, |x, y| compare(op, x, y))?,
        (TensorData::Si64(a), TensorData::Si64(b)) => zip_with(a, b, |x, y| compare(op, x, y))?,
        (TensorData::Bool(a), TensorData::Bool(b)) => zip_with(a, b, |x, y| compare(op, x, y))?,
        (a, b) => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeMismatch,
                format!("compare {:?} with {:?}", a.dtype(), b.dtype()),
            ))
        }
    };
    Ok(TensorData::Bool(flags))
}

fn choose<T: Copy>(pred: &[u8], on_true: &[T], on_false: &[T]) -> BackendResult<Arc<[T]>> {
    if pred.len() != on_true.len() || pred.len() != on_false.len() {
        return Err(BackendError::execution("select size mismatch"));
    }
    Ok(pred
        .iter()
        .zip(on_true.iter().zip(on_false))
        .map(|(&flag, (&a, &b))| if flag != 0 { a } else { b })
        .collect())
}

fn select_kernel(
    pred: &TensorData,
    on_true: &TensorData,
    on_false: &TensorData,
) -> BackendResult<TensorData> {
    let TensorData::Bool(pred) = pred else {
        return Err(BackendError::spec(
            SpecErrorCode::DTypeMismatch,
            format!("select predicate must be i1, got {:?}", pred.dtype()),
        ));
    };
    Ok(match (on_true, on_false) {
        (TensorData::F32(a), TensorData::F32(b)) => TensorData::F32(choose(pred, a, b)?),
        (TensorData::F64(a), TensorData::F64(b)) => TensorData::F64(choose(pred, a, b)?),
        (TensorData::Si32(a), TensorData::Si32(b)) => TensorData::Si32(choose(pred, a, b)?),
        (TensorData::Si64(a), TensorData::Si64(b)) => TensorData::Si64(choose(pred, a, b)?),
        (TensorData::Bool(a), TensorData::Bool(b)) => TensorData::Bool(choose(pred, a, b)?),
        (a, b) => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeMismatch,
                format!("select branches {:?} and {:?}", a.dtype(), b.dtype()),
            ))
        }
    })
}

macro_rules! float_unary {
    ($name:ident, $ty:ty) => {
        fn $name(op: ElementwiseUnaryOp, x: $ty) -> BackendResult<$ty> {
            Ok(match op {
                ElementwiseUnaryOp::Neg => -x,
                ElementwiseUnaryOp::Abs => x.abs(),
                ElementwiseUnaryOp::Exp => x.exp(),
                ElementwiseUnaryOp::Log => x.ln(),
                ElementwiseUnaryOp::Tanh => x.tanh(),
                ElementwiseUnaryOp::Sqrt => x.sqrt(),
                ElementwiseUnaryOp::Rsqrt => 1.0 / x.sqrt(),
                ElementwiseUnaryOp::Floor => x.floor(),
                ElementwiseUnaryOp::Ceil => x.ceil(),
                ElementwiseUnaryOp::Sign => {
                    if x == 0.0 || x.is_nan() {
                        x
                    } else {
                        x.signum()
                    }
                }
                ElementwiseUnaryOp::Not => {
                    return Err(unsupported(
                        "elementwise_unary",
                        "not on floating point values".to_string(),
                    ))
                }
            })
        }
    };
}

macro_rules! int_unary {
    ($name:ident, $ty:ty) => {
        fn $name(op: ElementwiseUnaryOp, x: $ty) -> BackendResult<$ty> {
            Ok(match op {
                ElementwiseUnaryOp::Neg => x.wrapping_neg(),
                ElementwiseUnaryOp::Abs => x.wrapping_abs(),
                ElementwiseUnaryOp::Sign => x.signum(),
                ElementwiseUnaryOp::Not => !x,
                ElementwiseUnaryOp::Floor | ElementwiseUnaryOp::Ceil => x,
                other => {
                    return Err(unsupported(
                        "elementwise_unary",
                        format!("{other:?} on integer values"),
                    ))
                }
            })
        }
    };
}

float_unary!(unary_f32, f32);
float_unary!(unary_f64, f64);
int_unary!(unary_i32, i32);
int_unary!(unary_i64, i64);

fn map_values<T: Copy, U>(
    values: &[T],
    f: impl Fn(T) -> BackendResult<U>,
) -> BackendResult<Arc<[U]>> {
    values.iter().map(|&value| f(value)).collect()
}

fn op_elementwise_unary(inputs: &[CpuTensor], op: ElementwiseUnaryOp) -> BackendResult<CpuTensor> {
    let input = expect_single(inputs)?;
    let data = match &input.data {
        TensorData::F32(values) => TensorData::F32(map_values(values, |x| unary_f32(op, x))?),
        TensorData::F64(values) => TensorData::F64(map_values(values, |x| unary_f64(op, x))?),
        TensorData::Si32(values) => TensorData::Si32(map_values(values, |x| unary_i32(op, x))?),
        TensorData::Si64(values) => TensorData::Si64(map_values(values, |x| unary_i64(op, x))?),
        TensorData::Bool(values) if matches!(op, ElementwiseUnaryOp::Not) => {
            TensorData::Bool(map_values(values, |x| Ok((x == 0) as u8))?)
        }
        TensorData::Bool(_) => {
            return Err(unsupported("elementwise_unary", format!("{op:?} on i1 values")));
        }
    };
    CpuTensor::from_parts(&input.dims()?, data)
}

/// Element values widened to a common host representation for casts.
enum Widened {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

fn widen(data: &TensorData) -> Widened {
    match data {
        TensorData::Bool(values) => {
            Widened::Int(values.iter().map(|&v| i64::from(v != 0)).collect())
        }
        TensorData::Si32(values) => Widened::Int(values.iter().map(|&v| i64::from(v)).collect()),
        TensorData::Si64(values) => Widened::Int(values.to_vec()),
        TensorData::F32(values) => Widened::Float(values.iter().map(|&v| f64::from(v)).collect()),
        TensorData::F64(values) => Widened::Float(values.to_vec()),
    }
}

fn op_cast(inputs: &[CpuTensor], spec: &CastSpec) -> BackendResult<CpuTensor> {
    let input = expect_single(inputs)?;
    let widened = widen(&input.data);
    // Float to integer conversions saturate and map NaN to zero.
    let data = match (spec.dtype, widened) {
        (DType::I1, Widened::Int(values)) => {
            TensorData::Bool(values.iter().map(|&v| (v != 0) as u8).collect())
        }
        (DType::I1, Widened::Float(values)) => {
            TensorData::Bool(values.iter().map(|&v| (v != 0.0) as u8).collect())
        }
        (DType::Si32, Widened::Int(values)) => {
            TensorData::Si32(values.iter().map(|&v| v as i32).collect())
        }
        (DType::Si32, Widened::Float(values)) => {
            TensorData::Si32(values.iter().map(|&v| v as i32).collect())
        }
        (DType::Si64, Widened::Int(values)) => TensorData::Si64(Arc::from(values)),
        (DType::Si64, Widened::Float(values)) => {
            TensorData::Si64(values.iter().map(|&v| v as i64).collect())
        }
        (DType::F32, Widened::Int(values)) => {
            TensorData::F32(values.iter().map(|&v| v as f32).collect())
        }
        (DType::F32, Widened::Float(values)) => {
            TensorData::F32(values.iter().map(|&v| v as f32).collect())
        }
        (DType::F64, Widened::Int(values)) => {
            TensorData::F64(values.iter().map(|&v| v as f64).collect())
        }
        (DType::F64, Widened::Float(values)) => TensorData::F64(Arc::from(values)),
    };
    CpuTensor::from_parts(&input.dims()?, data)
}

fn extent_tensor(dims: &[usize]) -> BackendResult<CpuTensor> {
    let mut values = Vec::with_capacity(dims.len());
    for &dim in dims {
        values.push(i64::try_from(dim).map_err(|_| {
            BackendError::spec(
                SpecErrorCode::InvalidExtent,
                format!("extent {dim} overflows"),
            )
        })?);
    }
    CpuTensor::i64(&[values.len()], &values)
}

fn index_tensor(value: usize) -> BackendResult<CpuTensor> {
    let value = i64::try_from(value).map_err(|_| {
        BackendError::spec(
            SpecErrorCode::InvalidExtent,
            format!("index {value} overflows"),
        )
    })?;
    CpuTensor::i64(&[], &[value])
}

/// Reads a 1-D si64 extent tensor.
fn read_extents(tensor: &CpuTensor) -> BackendResult<Vec<usize>> {
    if tensor.dims()?.len() != 1 {
        return Err(BackendError::spec(
            SpecErrorCode::RankMismatch,
            "extent tensors must be 1-D".to_string(),
        ));
    }
    let values = tensor.as_i64().ok_or_else(|| {
        BackendError::spec(
            SpecErrorCode::DTypeMismatch,
            format!("extent tensors must be si64, got {:?}", tensor.spec.dtype),
        )
    })?;
    values
        .iter()
        .map(|&value| {
            usize::try_from(value).map_err(|_| {
                BackendError::spec(SpecErrorCode::InvalidExtent, format!("extent {value}"))
            })
        })
        .collect()
}

fn read_all_extents(inputs: &[CpuTensor]) -> BackendResult<Vec<Vec<usize>>> {
    inputs.iter().map(read_extents).collect()
}

fn read_index(tensor: &CpuTensor) -> BackendResult<i64> {
    match tensor.as_i64() {
        Some([value]) => Ok(*value),
        _ => Err(BackendError::spec(
            SpecErrorCode::ShapeMismatch,
            "expected a single si64 index".to_string(),
        )),
    }
}

fn read_predicate(tensor: &CpuTensor) -> BackendResult<bool> {
    match &tensor.data {
        TensorData::Bool(values) if values.len() == 1 => Ok(values[0] != 0),
        _ => Err(BackendError::spec(
            SpecErrorCode::ShapeMismatch,
            "expected a single i1 predicate".to_string(),
        )),
    }
}

fn expect_single(inputs: &[CpuTensor]) -> BackendResult<&CpuTensor> {
    if inputs.len() != 1 {
        Err(BackendError::execution("operation expects single input"))
    } else {
        Ok(&inputs[0])
    }
}

fn static_dims(shape: &Shape) -> BackendResult<Vec<usize>> {
    shape
        .dims()
        .iter()
        .map(|dim| match dim {
            Dimension::Static(v) => Ok(*v),
            Dimension::Dynamic(sym) => Err(BackendError::execution(format!(
                "dynamic dimension {} not supported at runtime",
                sym.as_str()
            ))),
        })
        .collect()
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

fn bytes_to_f32(bytes: &[u8]) -> BackendResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(BackendError::execution(
            "literal byte length mismatches f32",
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn bytes_to_i32(bytes: &[u8]) -> BackendResult<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        return Err(BackendError::execution(
            "literal byte length mismatches i32",
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn bytes_to_i64(bytes: &[u8]) -> BackendResult<Vec<i64>> {
    if bytes.len() % 8 != 0 {
        return Err(BackendError::execution(
            "literal byte length mismatches i64",
        ));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            i64::from_le_bytes(raw)
        })
        .collect())
}

fn bytes_to_f64(bytes: &[u8]) -> BackendResult<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(BackendError::execution(
            "literal byte length mismatches f64",
        ));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

fn to_le_bytes<T: Copy, const N: usize>(values: &[T], encode: impl Fn(T) -> [u8; N]) -> Arc<[u8]> {
    let mut bytes = Vec::with_capacity(values.len() * N);
    for &value in values {
        bytes.extend_from_slice(&encode(value));
    }
    Arc::from(bytes.into_boxed_slice())
}

/// Row-major iteration over every coordinate of a shape.
struct MultiIndex {
    shape: Vec<usize>,
    current: Vec<usize>,
    first: bool,
    exhausted: bool,
}

impl MultiIndex {
    fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            current: vec![0; shape.len()],
            first: true,
            exhausted: shape.contains(&0),
        }
    }
}

impl Iterator for MultiIndex {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        if self.first {
            self.first = false;
            if self.shape.is_empty() {
                self.exhausted = true;
            }
            return Some(self.current.clone());
        }
        for i in (0..self.current.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.shape[i] {
                return Some(self.current.clone());
            }
            self.current[i] = 0;
        }
        self.exhausted = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankspec::ir::spec::{AssertSpec, CondSpec, ConstShapeSpec, ProgramBuilder, Region};
    use rankspec::ir::utils::{extent_tensor_spec, index_spec, predicate_spec};

    fn instruction(op: Operation, output: ValueType) -> Instruction {
        Instruction {
            id: ValueId(100),
            op,
            operands: Vec::new(),
            output,
        }
    }

    #[test]
    fn broadcast_binary_stretches_unit_axes() {
        let backend = CpuPortableBackend::new();
        let lhs = CpuTensor::f32(&[3, 1], &[1.0, 2.0, 3.0]).expect("lhs");
        let rhs = CpuTensor::f32(&[1, 4], &[10.0, 20.0, 30.0, 40.0]).expect("rhs");
        let inst = instruction(
            Operation::BroadcastBinary(ElementwiseBinaryOp::Add),
            ValueType::Tensor(TensorSpec::dynamic(DType::F32, 2)),
        );
        let out = backend
            .execute_instruction(&inst, &[lhs, rhs])
            .expect("broadcast add");
        assert_eq!(out[0].dims().expect("dims"), vec![3, 4]);
        let expected: [f32; 12] = [
            11.0, 21.0, 31.0, 41.0, 12.0, 22.0, 32.0, 42.0, 13.0, 23.0, 33.0, 43.0,
        ];
        assert_eq!(out[0].as_f32().expect("f32"), &expected);
    }

    #[test]
    fn declared_static_extent_is_enforced() {
        let backend = CpuPortableBackend::new();
        let value = CpuTensor::f32(&[2], &[1.0, 2.0]).expect("value");
        let inst = instruction(
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg),
            ValueType::Tensor(tensor_spec_static(DType::F32, &[3])),
        );
        let err = backend
            .execute_instruction(&inst, &[value])
            .expect_err("extent 2 does not match declared 3");
        assert!(matches!(err, BackendError::SpecViolation(_)));
    }

    #[test]
    fn integer_division_by_zero_is_reported() {
        let backend = CpuPortableBackend::new();
        let lhs = CpuTensor::i32(&[2], &[4, 5]).expect("lhs");
        let rhs = CpuTensor::i32(&[2], &[2, 0]).expect("rhs");
        let inst = instruction(
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Div),
            ValueType::Tensor(TensorSpec::unranked(DType::Si32)),
        );
        let err = backend
            .execute_instruction(&inst, &[lhs, rhs])
            .expect_err("division by zero");
        match err {
            BackendError::SpecViolation(spec) => {
                assert_eq!(spec.code, SpecErrorCode::IntegerDivideByZero)
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn minimum_broadcast_shapes_yields_tuple() {
        let backend = CpuPortableBackend::new();
        let a = CpuTensor::i64(&[2], &[3, 1]).expect("a");
        let b = CpuTensor::i64(&[2], &[1, 4]).expect("b");
        let inst = instruction(
            Operation::MinimumBroadcastShapes,
            ValueType::Tuple(vec![
                ValueType::Tensor(extent_tensor_spec()),
                ValueType::Tensor(extent_tensor_spec()),
            ]),
        );
        let out = backend.execute_instruction(&inst, &[a, b]).expect("run");
        assert_eq!(out[0].as_i64().expect("i64"), &[3, 1]);
        assert_eq!(out[1].as_i64().expect("i64"), &[4]);
    }

    #[test]
    fn reshape_keeps_zero_element_tensors() {
        let backend = CpuPortableBackend::new();
        let value = CpuTensor::f32(&[0, 3], &[]).expect("value");
        let shape = CpuTensor::i64(&[1], &[0]).expect("shape");
        let inst = instruction(
            Operation::DynamicReshape,
            ValueType::Tensor(TensorSpec::dynamic(DType::F32, 1)),
        );
        let out = backend
            .execute_instruction(&inst, &[value, shape])
            .expect("reshape");
        assert_eq!(out[0].dims().expect("dims"), vec![0]);

        let lhs = CpuTensor::f32(&[0, 1], &[]).expect("lhs");
        let rhs = CpuTensor::f32(&[1, 5], &[1.0; 5]).expect("rhs");
        let add = instruction(
            Operation::BroadcastBinary(ElementwiseBinaryOp::Add),
            ValueType::Tensor(TensorSpec::dynamic(DType::F32, 2)),
        );
        let out = backend.execute_instruction(&add, &[lhs, rhs]).expect("add");
        assert_eq!(out[0].dims().expect("dims"), vec![0, 5]);
    }

    #[test]
    fn run_function_follows_cond_and_assert() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let flag = builder.add_parameter(ValueType::Tensor(predicate_spec()));
        let then_id = ValueId(10);
        let else_id = ValueId(11);
        let then_region = Region {
            body: vec![Instruction {
                id: then_id,
                op: Operation::ConstShape(ConstShapeSpec { extents: vec![7] }),
                operands: Vec::new(),
                output: ValueType::Tensor(extent_tensor_spec()),
            }],
            result_ids: vec![then_id],
            results: vec![ValueType::Tensor(extent_tensor_spec())],
        };
        let else_region = Region {
            body: vec![
                Instruction {
                    id: ValueId(12),
                    op: Operation::Assert(AssertSpec {
                        message: "flag must be set".to_string(),
                    }),
                    operands: vec![Operand::Value(flag)],
                    output: ValueType::unit(),
                },
                Instruction {
                    id: else_id,
                    op: Operation::ConstShape(ConstShapeSpec { extents: vec![9] }),
                    operands: Vec::new(),
                    output: ValueType::Tensor(extent_tensor_spec()),
                },
            ],
            result_ids: vec![else_id],
            results: vec![ValueType::Tensor(extent_tensor_spec())],
        };
        let result = builder.emit_single(
            Operation::Cond(CondSpec {
                then_region,
                else_region,
            }),
            vec![Operand::Value(flag)],
            ValueType::Tensor(extent_tensor_spec()),
        );
        let count = builder.emit_single(
            Operation::NumElements,
            vec![Operand::Value(result)],
            ValueType::Tensor(index_spec()),
        );
        let function = builder.finish("cond", vec![count])?;
        let backend = CpuPortableBackend::new();

        let taken = CpuTensor::bool(&[], &[true])?;
        let out = backend.run_function(&function, &[taken])?;
        assert_eq!(out[0].as_i64().expect("i64"), &[7]);

        let not_taken = CpuTensor::bool(&[], &[false])?;
        let err = backend
            .run_function(&function, &[not_taken])
            .expect_err("assertion fires");
        match err {
            BackendError::AssertionFailed { message } => assert_eq!(message, "flag must be set"),
            other => panic!("unexpected error {other}"),
        }
        Ok(())
    }

    #[test]
    fn multi_index_covers_scalars_and_empty_shapes() {
        assert_eq!(MultiIndex::new(&[]).count(), 1);
        assert_eq!(MultiIndex::new(&[2, 0, 3]).count(), 0);
        assert_eq!(
            MultiIndex::new(&[2, 2]).collect::<Vec<_>>(),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
    }
}
