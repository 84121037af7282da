use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::conversion::{ConversionDiagnostic, ConversionStage};
use crate::ir::spec::{Function, Instruction, Operation, Program, ValueId, ValueType};
use crate::ir::utils::{collect_value_types, operand_type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Constant,
    ElementwiseUnary,
    ElementwiseBinary,
    Compare,
    Select,
    Cast,
    BroadcastBinary,
    BroadcastCompare,
    BroadcastSelect,
    ShapeOf,
    NumElements,
    ShapeRank,
    ShapeEq,
    ShapeAny,
    ShapeBroadcast,
    MinimumBroadcastShapes,
    ConstShape,
    FromElements,
    DynamicReshape,
    TensorCast,
    Cond,
    Assert,
}

impl OperationKind {
    pub fn from_op(op: &Operation) -> Self {
        match op {
            Operation::Constant(_) => OperationKind::Constant,
            Operation::ElementwiseUnary(_) => OperationKind::ElementwiseUnary,
            Operation::ElementwiseBinary(_) => OperationKind::ElementwiseBinary,
            Operation::Compare(_) => OperationKind::Compare,
            Operation::Select => OperationKind::Select,
            Operation::Cast(_) => OperationKind::Cast,
            Operation::BroadcastBinary(_) => OperationKind::BroadcastBinary,
            Operation::BroadcastCompare(_) => OperationKind::BroadcastCompare,
            Operation::BroadcastSelect => OperationKind::BroadcastSelect,
            Operation::ShapeOf => OperationKind::ShapeOf,
            Operation::NumElements => OperationKind::NumElements,
            Operation::ShapeRank => OperationKind::ShapeRank,
            Operation::ShapeEq => OperationKind::ShapeEq,
            Operation::ShapeAny => OperationKind::ShapeAny,
            Operation::ShapeBroadcast => OperationKind::ShapeBroadcast,
            Operation::MinimumBroadcastShapes => OperationKind::MinimumBroadcastShapes,
            Operation::ConstShape(_) => OperationKind::ConstShape,
            Operation::FromElements => OperationKind::FromElements,
            Operation::DynamicReshape => OperationKind::DynamicReshape,
            Operation::TensorCast => OperationKind::TensorCast,
            Operation::Cond(_) => OperationKind::Cond,
            Operation::Assert(_) => OperationKind::Assert,
        }
    }
}

/// Decides whether an operation may remain in the converted IR.
///
/// `operand_types` is aligned with the instruction operands; `None` marks an operand
/// whose type could not be resolved.
pub trait LegalityPolicy: Send + Sync {
    fn is_legal(&self, op: &Operation, operand_types: &[Option<ValueType>]) -> bool;
}

/// Operations of a governed kind are legal only when every operand is a ranked tensor.
/// All other operations are always legal.
#[derive(Debug, Clone, Default)]
pub struct RankedOperandsPolicy {
    governed: HashSet<OperationKind>,
}

impl RankedOperandsPolicy {
    pub fn new(governed: impl IntoIterator<Item = OperationKind>) -> Self {
        Self {
            governed: governed.into_iter().collect(),
        }
    }

    pub fn governs(&self, kind: OperationKind) -> bool {
        self.governed.contains(&kind)
    }
}

impl LegalityPolicy for RankedOperandsPolicy {
    fn is_legal(&self, op: &Operation, operand_types: &[Option<ValueType>]) -> bool {
        if !self.governs(OperationKind::from_op(op)) {
            return true;
        }
        operand_types
            .iter()
            .all(|ty| matches!(ty, Some(ValueType::Tensor(spec)) if !spec.is_unranked()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LegalityReport {
    pub diagnostics: Vec<ConversionDiagnostic>,
}

impl LegalityReport {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn push(&mut self, diagnostic: ConversionDiagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

impl fmt::Display for LegalityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages = self
            .diagnostics
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        write!(
            f,
            "{} diagnostic(s): {}",
            self.diagnostics.len(),
            messages.join("; ")
        )
    }
}

/// Checks every instruction of the function, nested regions included, against `policy`.
pub fn check_function_legality(
    function: &Function,
    policy: &dyn LegalityPolicy,
) -> Result<(), LegalityReport> {
    let mut report = LegalityReport::default();
    check_function_into(function, policy, &mut report);
    if report.is_ok() {
        Ok(())
    } else {
        Err(report)
    }
}

pub fn check_program_legality(
    program: &Program,
    policy: &dyn LegalityPolicy,
) -> Result<(), LegalityReport> {
    let mut report = LegalityReport::default();
    for function in &program.functions {
        check_function_into(function, policy, &mut report);
    }
    if report.is_ok() {
        Ok(())
    } else {
        Err(report)
    }
}

fn check_function_into(
    function: &Function,
    policy: &dyn LegalityPolicy,
    report: &mut LegalityReport,
) {
    let types = collect_value_types(function);
    for (index, instruction) in function.body.iter().enumerate() {
        check_instruction(function, index, instruction, &types, policy, report);
    }
}

fn check_instruction(
    function: &Function,
    top_level_index: usize,
    instruction: &Instruction,
    types: &HashMap<ValueId, ValueType>,
    policy: &dyn LegalityPolicy,
    report: &mut LegalityReport,
) {
    let operand_types = instruction
        .operands
        .iter()
        .map(|operand| operand_type(operand, types))
        .collect::<Vec<_>>();
    if !policy.is_legal(&instruction.op, &operand_types) {
        report.push(ConversionDiagnostic::new(
            ConversionStage::Legalize,
            Some(function.name.clone()),
            Some(top_level_index),
            format!(
                "operation {} (%{}) is not legal for the target",
                instruction.op.mnemonic(),
                instruction.id.0
            ),
        ));
    }
    for region in instruction.op.regions() {
        for nested in &region.body {
            check_instruction(function, top_level_index, nested, types, policy, report);
        }
    }
}
