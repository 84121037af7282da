use std::{collections::HashMap, fmt, fs, io, path::Path, sync::Arc};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use thiserror::Error;

/// IR version stamped into every serialized program.
pub const IR_VERSION: &str = "rankspec.v1";

fn default_ir_version() -> String {
    IR_VERSION.to_string()
}

/// Enumerates scalar element types understood by the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I1,
    Si32,
    Si64,
    F32,
    F64,
}

impl DType {
    /// Returns the size in bytes of one element in literal payloads.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 => 1,
            DType::Si32 | DType::F32 => 4,
            DType::Si64 | DType::F64 => 8,
        }
    }
}

/// Names a symbolic dynamic dimension (e.g. `?d0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimSymbol(Arc<str>);

impl DimSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for DimSymbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DimSymbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(DimSymbol::new(name))
    }
}

/// Represents a single axis extent in a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic(DimSymbol),
}

/// Logical tensor shape as an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    /// Rank-0 shape.
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    /// Shape of the given rank whose every extent is unknown.
    pub fn dynamic(rank: usize) -> Self {
        Self {
            dims: (0..rank)
                .map(|axis| Dimension::Dynamic(DimSymbol::new(format!("d{axis}"))))
                .collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        let mut dims = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            match dim {
                Dimension::Static(value) => dims.push(*value),
                Dimension::Dynamic(_) => return None,
            }
        }
        Some(dims)
    }

    /// Returns element count when all dims are static.
    pub fn element_count(&self) -> Option<usize> {
        let dims = self.static_dims()?;
        let mut count = 1usize;
        for dim in dims {
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }
}

/// Shape component of a tensor type: a known list of dimensions or an unknown rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorShape {
    Ranked(Shape),
    Unranked,
}

/// Tensor metadata coupling dtype and (possibly unranked) shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: TensorShape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self {
            dtype,
            shape: TensorShape::Ranked(shape),
        }
    }

    pub fn unranked(dtype: DType) -> Self {
        Self {
            dtype,
            shape: TensorShape::Unranked,
        }
    }

    /// Rank-`rank` tensor with all extents dynamic.
    pub fn dynamic(dtype: DType, rank: usize) -> Self {
        Self::new(dtype, Shape::dynamic(rank))
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Shape::scalar())
    }

    pub fn is_unranked(&self) -> bool {
        matches!(self.shape, TensorShape::Unranked)
    }

    pub fn ranked_shape(&self) -> Option<&Shape> {
        match &self.shape {
            TensorShape::Ranked(shape) => Some(shape),
            TensorShape::Unranked => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.ranked_shape().map(Shape::rank)
    }

    /// Returns total element count when the shape is ranked and fully static.
    pub fn element_count(&self) -> Option<usize> {
        self.ranked_shape()?.element_count()
    }

    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size_in_bytes())
    }
}

/// Dense literal tensor payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub bytes: Arc<[u8]>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, bytes: Arc<[u8]>) -> Self {
        Self { spec, bytes }
    }

    /// Rank-0 si64 literal, the representation of index constants.
    pub fn index_scalar(value: i64) -> Self {
        Self::new(
            TensorSpec::scalar(DType::Si64),
            Arc::from(value.to_le_bytes().to_vec()),
        )
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl Serialize for TensorLiteral {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TensorLiteral", 2)?;
        state.serialize_field("spec", &self.spec)?;
        state.serialize_field("bytes", &self.bytes.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TensorLiteral {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorLiteralHelper {
            spec: TensorSpec,
            bytes: Vec<u8>,
        }

        let helper = TensorLiteralHelper::deserialize(deserializer)?;
        Ok(TensorLiteral {
            spec: helper.spec,
            bytes: Arc::<[u8]>::from(helper.bytes),
        })
    }
}

/// Initialization payload when materialising tensors on a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TensorInit {
    Literal(TensorLiteral),
    Zeroed(TensorSpec),
}

/// Comparator used by `compare` and `broadcast_compare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseUnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Tanh,
    Sqrt,
    Rsqrt,
    Floor,
    Ceil,
    Sign,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Maximum,
    Minimum,
    Atan2,
    And,
    Or,
    Xor,
}

/// Attribute payload for `compare`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompareSpec {
    pub op: ComparisonOp,
}

/// Attribute payload for `cast`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastSpec {
    pub dtype: DType,
}

/// Compile-time extent list for `const_shape`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstShapeSpec {
    pub extents: Vec<usize>,
}

/// Control-flow payload for `cond`. Both regions yield the instruction's single result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondSpec {
    pub then_region: Region,
    pub else_region: Region,
}

/// Attribute payload for `assert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertSpec {
    pub message: String,
}

/// Unique identifier for SSA values in a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Typing information for SSA values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorSpec),
    Tuple(Vec<ValueType>),
}

impl ValueType {
    /// The empty tuple produced by side-effect-only operations such as `assert`.
    pub fn unit() -> Self {
        ValueType::Tuple(Vec::new())
    }

    pub fn as_tensor(&self) -> Option<&TensorSpec> {
        match self {
            ValueType::Tensor(spec) => Some(spec),
            ValueType::Tuple(_) => None,
        }
    }
}

/// Operand reference in an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Value(ValueId),
    TupleElement { tuple: ValueId, index: usize },
    Literal(TensorLiteral),
}

impl Operand {
    /// Returns the SSA value referenced by the operand, if any.
    pub fn value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(value) => Some(*value),
            Operand::TupleElement { tuple, .. } => Some(*tuple),
            Operand::Literal(_) => None,
        }
    }
}

impl From<ValueId> for Operand {
    fn from(value: ValueId) -> Self {
        Operand::Value(value)
    }
}

/// Declarative form of IR operations.
///
/// Compute operations carry their attribute payload inline. Shape operations work on
/// 1-D si64 extent tensors and rank-0 si64 index scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Constant(TensorLiteral),
    ElementwiseUnary(ElementwiseUnaryOp),
    ElementwiseBinary(ElementwiseBinaryOp),
    Compare(CompareSpec),
    Select,
    Cast(CastSpec),
    BroadcastBinary(ElementwiseBinaryOp),
    BroadcastCompare(CompareSpec),
    BroadcastSelect,
    ShapeOf,
    NumElements,
    ShapeRank,
    ShapeEq,
    ShapeAny,
    ShapeBroadcast,
    MinimumBroadcastShapes,
    ConstShape(ConstShapeSpec),
    FromElements,
    DynamicReshape,
    TensorCast,
    Cond(CondSpec),
    Assert(AssertSpec),
}

impl Operation {
    /// Short mnemonic used by the printer and in diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Operation::Constant(_) => "constant",
            Operation::ElementwiseUnary(_) => "elementwise_unary",
            Operation::ElementwiseBinary(_) => "elementwise_binary",
            Operation::Compare(_) => "compare",
            Operation::Select => "select",
            Operation::Cast(_) => "cast",
            Operation::BroadcastBinary(_) => "broadcast_binary",
            Operation::BroadcastCompare(_) => "broadcast_compare",
            Operation::BroadcastSelect => "broadcast_select",
            Operation::ShapeOf => "shape_of",
            Operation::NumElements => "num_elements",
            Operation::ShapeRank => "rank",
            Operation::ShapeEq => "shape_eq",
            Operation::ShapeAny => "shape_any",
            Operation::ShapeBroadcast => "shape_broadcast",
            Operation::MinimumBroadcastShapes => "minimum_broadcast_shapes",
            Operation::ConstShape(_) => "const_shape",
            Operation::FromElements => "from_elements",
            Operation::DynamicReshape => "dynamic_reshape",
            Operation::TensorCast => "tensor_cast",
            Operation::Cond(_) => "cond",
            Operation::Assert(_) => "assert",
        }
    }

    /// Nested regions owned by the operation.
    pub fn regions(&self) -> Vec<&Region> {
        match self {
            Operation::Cond(spec) => vec![&spec.then_region, &spec.else_region],
            _ => Vec::new(),
        }
    }

    pub fn regions_mut(&mut self) -> Vec<&mut Region> {
        match self {
            Operation::Cond(spec) => vec![&mut spec.then_region, &mut spec.else_region],
            _ => Vec::new(),
        }
    }
}

/// Single SSA instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<Operand>,
    pub output: ValueType,
}

/// Inline region used by control-flow constructs.
///
/// Instructions inside a region may read any value visible in the enclosing scopes.
/// `result_ids` are the values yielded to the parent instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub body: Vec<Instruction>,
    pub result_ids: Vec<ValueId>,
    pub results: Vec<ValueType>,
}

/// Function describing a reusable computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<ValueType>,
    pub parameter_ids: Vec<ValueId>,
    pub results: Vec<ValueType>,
    pub body: Vec<Instruction>,
    pub result_ids: Vec<ValueId>,
}

/// Complete module: a set of functions and the name of the entry function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default = "default_ir_version")]
    pub ir_version: String,
    pub entry: String,
    pub functions: Vec<Function>,
}

#[derive(Debug, Error)]
pub enum ProgramSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("program ir version '{found}' does not match expected '{expected}'")]
    VersionMismatch {
        found: String,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ProgramIoError {
    #[error(transparent)]
    Serialization(#[from] ProgramSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Program {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            ir_version: IR_VERSION.to_string(),
            entry: entry.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<Function>) -> Self {
        self.functions = functions;
        self
    }

    pub fn entry_function(&self) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == self.entry)
    }

    pub fn to_json_string(&self) -> Result<String, ProgramSerdeError> {
        serde_json::to_string_pretty(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, ProgramSerdeError> {
        let mut program: Program = serde_json::from_str(src).map_err(ProgramSerdeError::from)?;
        program.ir_version = normalize_ir_version(program.ir_version)?;
        Ok(program)
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, ProgramSerdeError> {
        bincode::serialize(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, ProgramSerdeError> {
        let mut program: Program = bincode::deserialize(bytes).map_err(ProgramSerdeError::from)?;
        program.ir_version = normalize_ir_version(program.ir_version)?;
        Ok(program)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(ProgramIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let contents = fs::read_to_string(path).map_err(ProgramIoError::from)?;
        Program::from_json_str(&contents).map_err(ProgramIoError::from)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let bytes = self.to_bincode_bytes()?;
        fs::write(path, bytes).map_err(ProgramIoError::from)
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let bytes = fs::read(path).map_err(ProgramIoError::from)?;
        Program::from_bincode_slice(&bytes).map_err(ProgramIoError::from)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}

fn normalize_ir_version(version: String) -> Result<String, ProgramSerdeError> {
    if version.is_empty() {
        return Ok(IR_VERSION.to_string());
    }
    if version == IR_VERSION {
        Ok(version)
    } else {
        Err(ProgramSerdeError::VersionMismatch {
            found: version,
            expected: IR_VERSION,
        })
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (entry, version) = (&self.entry, &self.ir_version);
        write_line(f, 0, &format!("program @{entry} (ir_version = {version}) {{"))?;
        for function in &self.functions {
            fmt_function(function, 1, f)?;
        }
        write_line(f, 0, "}")
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_function(self, 0, f)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_value_type(self))
    }
}

fn fmt_function(function: &Function, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_line(f, indent, &format!("func @{} {{", function.name))?;
    if !function.parameter_ids.is_empty() {
        write_line(f, indent + 1, "params:")?;
        for (value_id, value_type) in function
            .parameter_ids
            .iter()
            .zip(function.parameters.iter())
        {
            write_line(
                f,
                indent + 2,
                &format!("%{} : {}", value_id.0, format_value_type(value_type)),
            )?;
        }
    }
    if !function.body.is_empty() {
        write_line(f, indent + 1, "body:")?;
        for instruction in &function.body {
            fmt_instruction(instruction, indent + 2, f)?;
        }
    }
    if !function.result_ids.is_empty() {
        write_line(f, indent + 1, "results:")?;
        for (value_id, value_type) in function.result_ids.iter().zip(function.results.iter()) {
            write_line(
                f,
                indent + 2,
                &format!("%{} : {}", value_id.0, format_value_type(value_type)),
            )?;
        }
    }
    write_line(f, indent, "}")
}

fn fmt_region(
    label: &str,
    region: &Region,
    indent: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    write_line(f, indent, &format!("{label} {{"))?;
    for instruction in &region.body {
        fmt_instruction(instruction, indent + 1, f)?;
    }
    let yields = region
        .result_ids
        .iter()
        .map(|id| format!("%{}", id.0))
        .collect::<Vec<_>>()
        .join(", ");
    write_line(f, indent + 1, &format!("yield {yields}"))?;
    write_line(f, indent, "}")
}

fn fmt_instruction(
    instruction: &Instruction,
    indent: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    let operands = instruction
        .operands
        .iter()
        .map(format_operand)
        .collect::<Vec<_>>()
        .join(", ");
    let op_repr = format_op(&instruction.op);
    let line = if operands.is_empty() {
        format!(
            "%{} = {} -> {}",
            instruction.id.0,
            op_repr,
            format_value_type(&instruction.output)
        )
    } else {
        format!(
            "%{} = {}({}) -> {}",
            instruction.id.0,
            op_repr,
            operands,
            format_value_type(&instruction.output)
        )
    };
    match &instruction.op {
        Operation::Cond(spec) => {
            write_line(f, indent, &format!("{line} {{"))?;
            fmt_region("then", &spec.then_region, indent + 1, f)?;
            fmt_region("else", &spec.else_region, indent + 1, f)?;
            write_line(f, indent, "}")
        }
        _ => write_line(f, indent, &line),
    }
}

fn format_op(op: &Operation) -> String {
    match op {
        Operation::Constant(literal) => format!(
            "constant<{:?} x {}>",
            literal.spec.dtype,
            format_tensor_shape(&literal.spec.shape)
        ),
        Operation::ElementwiseUnary(kind) => format!("{kind:?}").to_lowercase(),
        Operation::ElementwiseBinary(kind) => format!("{kind:?}").to_lowercase(),
        Operation::Compare(spec) => format!("compare<{:?}>", spec.op),
        Operation::Cast(spec) => format!("cast<{:?}>", spec.dtype),
        Operation::BroadcastBinary(kind) => format!("broadcast_{kind:?}").to_lowercase(),
        Operation::BroadcastCompare(spec) => format!("broadcast_compare<{:?}>", spec.op),
        Operation::ConstShape(spec) => format!("const_shape{:?}", spec.extents),
        Operation::Assert(spec) => format!("assert<{:?}>", spec.message),
        other => other.mnemonic().to_string(),
    }
}

fn format_value_type(value_type: &ValueType) -> String {
    match value_type {
        ValueType::Tensor(spec) => {
            format!(
                "tensor<{:?} x {}>",
                spec.dtype,
                format_tensor_shape(&spec.shape)
            )
        }
        ValueType::Tuple(elements) => {
            let inner = elements
                .iter()
                .map(format_value_type)
                .collect::<Vec<_>>()
                .join(", ");
            format!("tuple<{}>", inner)
        }
    }
}

fn format_tensor_shape(shape: &TensorShape) -> String {
    match shape {
        TensorShape::Unranked => "*".to_string(),
        TensorShape::Ranked(shape) => format_shape(shape),
    }
}

fn format_shape(shape: &Shape) -> String {
    let dims = shape
        .dims()
        .iter()
        .map(|dim| match dim {
            Dimension::Static(v) => v.to_string(),
            Dimension::Dynamic(_) => "?".to_string(),
        })
        .collect::<Vec<_>>();
    if dims.is_empty() {
        "[]".to_string()
    } else {
        dims.join("x")
    }
}

fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::Value(id) => format!("%{}", id.0),
        Operand::TupleElement { tuple, index } => format!("%{}[{}]", tuple.0, index),
        Operand::Literal(lit) => format!(
            "literal(dtype={:?}, shape={})",
            lit.spec.dtype,
            format_tensor_shape(&lit.spec.shape)
        ),
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "{line}")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuilderError {
    #[error("result value %{value:?} has no recorded type")]
    UnknownResult { value: ValueId },
}

/// Lightweight builder for constructing functions programmatically.
#[derive(Default)]
pub struct ProgramBuilder {
    next_value_id: u32,
    parameters: Vec<(ValueId, ValueType)>,
    instructions: Vec<Instruction>,
    value_types: HashMap<ValueId, ValueType>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(&mut self, ty: ValueType) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        self.value_types.insert(id, ty.clone());
        self.parameters.push((id, ty));
        id
    }

    pub fn emit_single(
        &mut self,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        self.value_types.insert(id, output.clone());
        self.instructions.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        id
    }

    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.value_types.get(&id)
    }

    pub fn finish(
        self,
        name: impl Into<String>,
        result_ids: Vec<ValueId>,
    ) -> Result<Function, BuilderError> {
        let mut results = Vec::with_capacity(result_ids.len());
        for id in &result_ids {
            let ty = self
                .value_types
                .get(id)
                .ok_or(BuilderError::UnknownResult { value: *id })?
                .clone();
            results.push(ty);
        }
        let (parameter_ids, parameters): (Vec<_>, Vec<_>) = self.parameters.into_iter().unzip();
        Ok(Function {
            name: name.into(),
            parameters,
            parameter_ids,
            results,
            body: self.instructions,
            result_ids,
        })
    }
}

/// Stable set of error identifiers raised while validating or executing programs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpecErrorCode {
    DTypeNotSupported,
    DTypeMismatch,
    ShapeMismatch,
    RankMismatch,
    BroadcastIncompatible,
    InvalidExtent,
    IntegerDivideByZero,
    RegionSignatureMismatch,
    Unspecified(&'static str),
}

impl SpecErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecErrorCode::DTypeNotSupported => "SpecError: dtype not supported for op",
            SpecErrorCode::DTypeMismatch => "SpecError: dtype mismatch",
            SpecErrorCode::ShapeMismatch => "SpecError: shape mismatch",
            SpecErrorCode::RankMismatch => "SpecError: rank mismatch",
            SpecErrorCode::BroadcastIncompatible => "SpecError: shapes are not broadcastable",
            SpecErrorCode::InvalidExtent => "SpecError: invalid extent",
            SpecErrorCode::IntegerDivideByZero => "SpecError: integer divide by zero",
            SpecErrorCode::RegionSignatureMismatch => "SpecError: region signature mismatch",
            SpecErrorCode::Unspecified(code) => code,
        }
    }
}

/// Validation failure captured during execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecError {
    pub code: SpecErrorCode,
    pub detail: Option<String>,
}

impl SpecError {
    pub fn new(code: SpecErrorCode, detail: impl Into<Option<String>>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({detail})", self.code.as_str()),
            None => write!(f, "{}", self.code.as_str()),
        }
    }
}

impl std::error::Error for SpecError {}

/// Backend error surfaced to higher layers.
#[derive(Debug)]
pub enum BackendError {
    SpecViolation(SpecError),
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
    /// A runtime `assert` evaluated to false.
    AssertionFailed { message: String },
}

impl BackendError {
    pub fn spec(code: SpecErrorCode, detail: impl Into<Option<String>>) -> Self {
        BackendError::SpecViolation(SpecError::new(code, detail))
    }

    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        BackendError::AssertionFailed {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::SpecViolation(err) => write!(f, "{err}"),
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
            BackendError::AssertionFailed { message } => {
                write!(f, "assertion failed: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Portable backend trait that evaluates programs on concrete tensors.
pub trait PortableBackend: Send + Sync {
    type TensorHandle: Clone + Send + Sync + 'static;

    /// Returns a human-readable backend identifier (e.g., `"cpu"`).
    fn backend_name(&self) -> &str;

    /// Materialises a tensor handle from host initialisation data.
    fn materialize(&self, init: TensorInit) -> BackendResult<Self::TensorHandle>;

    /// Reads back a tensor handle into a dense literal.
    fn to_literal(&self, tensor: &Self::TensorHandle) -> BackendResult<TensorLiteral>;

    /// Executes a single region-free instruction given already materialised operands.
    ///
    /// Tuple-typed results are returned element by element; `assert` returns no handles.
    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>>;

    /// Executes a function body, including nested control-flow regions.
    fn run_function(
        &self,
        function: &Function,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>>;

    /// Executes an entire program starting from the entry function.
    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        let function = program
            .entry_function()
            .ok_or_else(|| BackendError::execution("entry function not found"))?;
        self.run_function(function, entry_inputs)
    }
}
