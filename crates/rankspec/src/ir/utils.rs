use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::ir::spec::{
    DType, Dimension, Function, Instruction, Operand, Region, Shape, TensorLiteral, TensorSpec,
    ValueId, ValueType,
};

/// Builds a static shape descriptor from explicit dimensions.
pub fn shape_static(dims: &[usize]) -> Shape {
    let dims: Vec<Dimension> = dims.iter().copied().map(Dimension::Static).collect();
    Shape::new(dims)
}

/// Builds a tensor spec with fully static dimensions.
pub fn tensor_spec_static(dtype: DType, dims: &[usize]) -> TensorSpec {
    TensorSpec::new(dtype, shape_static(dims))
}

/// Wraps a tensor spec as a value type.
pub fn value_type_tensor(spec: TensorSpec) -> ValueType {
    ValueType::Tensor(spec)
}

/// Type of a 1-D extent tensor of unknown length.
pub fn extent_tensor_spec() -> TensorSpec {
    TensorSpec::dynamic(DType::Si64, 1)
}

/// Type of an extent tensor whose length (the described rank) is known.
pub fn extent_tensor_spec_of_rank(rank: usize) -> TensorSpec {
    tensor_spec_static(DType::Si64, &[rank])
}

/// Type of a rank-0 si64 index scalar.
pub fn index_spec() -> TensorSpec {
    TensorSpec::scalar(DType::Si64)
}

/// Type of a rank-0 boolean predicate.
pub fn predicate_spec() -> TensorSpec {
    TensorSpec::scalar(DType::I1)
}

/// Creates a zeroed tensor literal for a fully static spec.
pub fn tensor_literal_zeros(spec: TensorSpec) -> Option<TensorLiteral> {
    let byte_len = spec.byte_len()?;
    Some(TensorLiteral::new(spec, Arc::<[u8]>::from(vec![0u8; byte_len])))
}

/// Creates a static f32 literal from host values.
pub fn tensor_literal_f32(dims: &[usize], values: &[f32]) -> TensorLiteral {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    TensorLiteral::new(tensor_spec_static(DType::F32, dims), Arc::from(bytes))
}

/// Returns every value an instruction reads, including values captured by its regions.
///
/// Values defined inside the instruction's own regions are not reported.
pub fn instruction_uses(instruction: &Instruction) -> Vec<ValueId> {
    let mut uses = Vec::new();
    for operand in &instruction.operands {
        if let Some(value) = operand.value() {
            push_unique(&mut uses, value);
        }
    }
    for region in instruction.op.regions() {
        let mut defined = HashSet::new();
        collect_region_captures(region, &mut defined, &mut uses);
    }
    uses
}

/// Returns the values a region reads from enclosing scopes.
pub fn region_captures(region: &Region) -> Vec<ValueId> {
    let mut uses = Vec::new();
    let mut defined = HashSet::new();
    collect_region_captures(region, &mut defined, &mut uses);
    uses
}

fn collect_region_captures(
    region: &Region,
    defined: &mut HashSet<ValueId>,
    uses: &mut Vec<ValueId>,
) {
    for instruction in &region.body {
        for operand in &instruction.operands {
            if let Some(value) = operand.value() {
                if !defined.contains(&value) {
                    push_unique(uses, value);
                }
            }
        }
        for nested in instruction.op.regions() {
            collect_region_captures(nested, defined, uses);
        }
        defined.insert(instruction.id);
    }
    for result in &region.result_ids {
        if !defined.contains(result) {
            push_unique(uses, *result);
        }
    }
}

fn push_unique(values: &mut Vec<ValueId>, value: ValueId) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Rewrites every reference to `from` inside the instruction, regions included.
pub fn replace_uses_in_instruction(instruction: &mut Instruction, from: ValueId, to: ValueId) {
    for operand in &mut instruction.operands {
        replace_in_operand(operand, from, to);
    }
    for region in instruction.op.regions_mut() {
        for nested in &mut region.body {
            replace_uses_in_instruction(nested, from, to);
        }
        for result in &mut region.result_ids {
            if *result == from {
                *result = to;
            }
        }
    }
}

fn replace_in_operand(operand: &mut Operand, from: ValueId, to: ValueId) {
    match operand {
        Operand::Value(value) if *value == from => *value = to,
        Operand::TupleElement { tuple, .. } if *tuple == from => *tuple = to,
        _ => {}
    }
}

/// Visits every instruction of a body in program order, descending into regions.
pub fn walk_instructions<'a>(body: &'a [Instruction], visit: &mut dyn FnMut(&'a Instruction)) {
    for instruction in body {
        visit(instruction);
        for region in instruction.op.regions() {
            walk_instructions(&region.body, visit);
        }
    }
}

/// Largest value id defined anywhere in the function, nested regions included.
pub fn max_value_id(function: &Function) -> Option<ValueId> {
    let mut max = function.parameter_ids.iter().copied().max();
    walk_instructions(&function.body, &mut |instruction| {
        max = Some(max.map_or(instruction.id, |current| current.max(instruction.id)));
    });
    max
}

/// Types of every value defined in the function, nested regions included.
pub fn collect_value_types(function: &Function) -> HashMap<ValueId, ValueType> {
    let mut types: HashMap<ValueId, ValueType> = function
        .parameter_ids
        .iter()
        .copied()
        .zip(function.parameters.iter().cloned())
        .collect();
    walk_instructions(&function.body, &mut |instruction| {
        types.insert(instruction.id, instruction.output.clone());
    });
    types
}

/// Resolves the type of an operand against a value-type table.
pub fn operand_type(operand: &Operand, types: &HashMap<ValueId, ValueType>) -> Option<ValueType> {
    match operand {
        Operand::Value(value) => types.get(value).cloned(),
        Operand::TupleElement { tuple, index } => match types.get(tuple)? {
            ValueType::Tuple(elements) => elements.get(*index).cloned(),
            ValueType::Tensor(_) => None,
        },
        Operand::Literal(literal) => Some(ValueType::Tensor(literal.spec.clone())),
    }
}
