//! Rewrites that make compute operations on unranked tensors rank-specialized.
//!
//! Three patterns cooperate under the legality driver:
//! - [`FlattenElementwisePattern`] turns element-wise ops into 1-D ops,
//! - [`ScalarBroadcastPattern`] handles a rank-0 operand paired with an unranked one,
//! - [`RankSpecializationPattern`] lowers the general broadcasting case into a
//!   `cond` ladder over the reduced operand rank.

mod decision;
mod flatten;
mod kinds;
mod pass;
mod rank_specialization;
mod scalar_broadcast;

use std::sync::Arc;

use crate::conversion::ConversionError;
use crate::ir::{
    index::InstId,
    pattern::{filters, OperationMatcher, OperationView, PatternSet},
    rewriter::ProgramRewriter,
    spec::{Function, Operand, Operation, TensorSpec, ValueId},
};

pub use decision::{
    capacity_message, plan_rank_specialization, BranchTree, Condition, DecisionError, Strategy,
};
pub use flatten::{emit_flatten_apply_restore, FlattenElementwisePattern};
pub use kinds::{
    KindCapability, KindRegistry, OpCapability, OpContract, RankCeilings,
    DEFAULT_BINARY_RANK_CEILING, DEFAULT_NARY_RANK_CEILING,
};
pub use pass::TransformUnrankedPass;
pub use rank_specialization::RankSpecializationPattern;
pub use scalar_broadcast::ScalarBroadcastPattern;

/// Result returned by a [`FunctionPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the IR.
    pub changed: bool,
    /// Number of sweeps executed while applying the pass.
    pub iterations: usize,
    /// Total number of patterns applied by the pass.
    pub rewrites_applied: usize,
    /// Instructions removed by the pass.
    pub erased_insts: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_insts: self.erased_insts + other.erased_insts,
        }
    }
}

/// Interface implemented by passes that operate on a single function.
pub trait FunctionPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, function: &mut Function) -> Result<PassResult, ConversionError>;
}

/// Snapshot of a compute instruction whose operands and result are all tensors.
#[derive(Debug, Clone)]
pub struct UnrankedOpView {
    pub root: InstId,
    pub op: Operation,
    pub operands: Vec<Operand>,
    pub operand_types: Vec<TensorSpec>,
    pub result: ValueId,
    pub result_type: TensorSpec,
}

impl UnrankedOpView {
    pub fn has_unranked_operand(&self) -> bool {
        self.operand_types.iter().any(TensorSpec::is_unranked)
    }
}

impl OperationView for UnrankedOpView {
    const MATCHER: OperationMatcher = filters::compute;

    fn extract(root: InstId, rewriter: &ProgramRewriter) -> Option<Self> {
        let instruction = rewriter.instruction(root)?;
        let operand_types = instruction
            .operands
            .iter()
            .map(|operand| {
                rewriter
                    .operand_type(operand)
                    .and_then(|ty| ty.as_tensor().cloned())
            })
            .collect::<Option<Vec<_>>>()?;
        let result_type = instruction.output.as_tensor()?.clone();
        Some(Self {
            root,
            op: instruction.op.clone(),
            operands: instruction.operands.clone(),
            operand_types,
            result: instruction.id,
            result_type,
        })
    }
}

/// Registers the three rewrites for every kind in `registry`.
pub fn populate_transform_unranked_patterns(
    registry: &Arc<KindRegistry>,
    ceilings: RankCeilings,
    patterns: &mut PatternSet,
) {
    patterns
        .insert_view::<UnrankedOpView, _>(FlattenElementwisePattern::new(Arc::clone(registry)))
        .insert_view::<UnrankedOpView, _>(ScalarBroadcastPattern::new(Arc::clone(registry)))
        .insert_view::<UnrankedOpView, _>(RankSpecializationPattern::new(
            Arc::clone(registry),
            ceilings,
        ));
}
