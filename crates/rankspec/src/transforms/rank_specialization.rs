use std::sync::Arc;

use tracing::trace;

use crate::ir::{
    builder::{emit_cond, Emitter, InsertionPoint},
    pattern::OpRewritePattern,
    rewriter::{ProgramRewriter, RewriteError},
    spec::{ComparisonOp, Operand, Operation, TensorSpec, ValueId, ValueType},
    utils::extent_tensor_spec_of_rank,
};
use crate::shape::oracle;

use super::{
    decision::{capacity_message, plan_rank_specialization, BranchTree, Condition, Strategy},
    flatten::emit_flatten_apply_restore,
    KindRegistry, OpContract, RankCeilings, UnrankedOpView,
};

/// Lowers a broadcasting op with unranked operands into a rank-specialized `cond` tree.
pub struct RankSpecializationPattern {
    registry: Arc<KindRegistry>,
    ceilings: RankCeilings,
}

impl RankSpecializationPattern {
    pub fn new(registry: Arc<KindRegistry>, ceilings: RankCeilings) -> Self {
        Self { registry, ceilings }
    }
}

impl OpRewritePattern<UnrankedOpView> for RankSpecializationPattern {
    fn name(&self) -> &'static str {
        "rank-specialization"
    }

    fn may_match(&self, view: &UnrankedOpView, _rewriter: &ProgramRewriter) -> bool {
        let Some(capability) = self.registry.lookup(&view.op) else {
            return false;
        };
        capability.contract() == OpContract::Broadcasting
            && capability.arity() == view.operands.len()
            && view.has_unranked_operand()
    }

    fn match_and_rewrite(
        &self,
        view: UnrankedOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        let Some(capability) = self.registry.lookup(&view.op) else {
            return Ok(false);
        };
        let ceiling = capability.rank_ceiling(&self.ceilings);
        let tree = plan_rank_specialization(view.operands.len(), ceiling);
        trace!(
            op = view.op.mnemonic(),
            ceiling,
            regions = tree.region_count(),
            "planned rank specialization"
        );

        let op = capability.instantiate(&view.op);
        let counterpart = capability
            .elementwise_counterpart(&view.op)
            .unwrap_or_else(|| op.clone());

        let replacement = {
            let mut at = InsertionPoint::new(rewriter, view.root);
            let lowering = Lowering::new(&mut at, &view, op, counterpart)?;
            lowering.lower(&mut at, &tree, None, &view.result_type)?
        };
        rewriter.replace_op(view.root, replacement)?;
        Ok(true)
    }
}

/// Values shared by every branch, computed before the outermost `cond`.
struct Lowering<'v> {
    view: &'v UnrankedOpView,
    op: Operation,
    counterpart: Operation,
    shapes: Vec<Operand>,
    element_counts: Vec<ValueId>,
}

/// Values computed inside the region that holds the rank ladder.
struct Reduction {
    operands: Vec<ValueId>,
    shapes: Vec<Operand>,
    max_rank: ValueId,
}

impl<'v> Lowering<'v> {
    fn new(
        emitter: &mut dyn Emitter,
        view: &'v UnrankedOpView,
        op: Operation,
        counterpart: Operation,
    ) -> Result<Self, RewriteError> {
        let mut shapes = Vec::with_capacity(view.operands.len());
        let mut element_counts = Vec::with_capacity(view.operands.len());
        for operand in &view.operands {
            let shape = oracle::shape_of(emitter, operand.clone())?;
            element_counts.push(oracle::num_elements(emitter, shape)?);
            shapes.push(Operand::Value(shape));
        }
        Ok(Self {
            view,
            op,
            counterpart,
            shapes,
            element_counts,
        })
    }

    fn lower(
        &self,
        emitter: &mut dyn Emitter,
        tree: &BranchTree,
        reduction: Option<&Reduction>,
        output: &TensorSpec,
    ) -> Result<ValueId, RewriteError> {
        match tree {
            BranchTree::Guard {
                condition,
                then_branch,
                else_branch,
            } => {
                let predicate = self.condition(emitter, *condition, reduction)?;
                emit_cond(
                    emitter,
                    predicate,
                    ValueType::Tensor(output.clone()),
                    |region| self.lower(region, then_branch, reduction, output),
                    |region| self.lower(region, else_branch, reduction, output),
                )
            }
            BranchTree::Reduced(body) => self.lower_reduced(emitter, body, output),
            BranchTree::AssertRank { rank, body } => {
                let reduction = require_reduction(reduction)?;
                let expected = oracle::index_constant(emitter, *rank as i64)?;
                let in_range = oracle::compare_index(
                    emitter,
                    reduction.max_rank,
                    expected,
                    ComparisonOp::Equal,
                )?;
                oracle::assert(emitter, in_range, capacity_message(*rank))?;
                self.lower(emitter, body, Some(reduction), output)
            }
            BranchTree::Apply(strategy) => self.apply(emitter, *strategy, reduction, output),
        }
    }

    fn condition(
        &self,
        emitter: &mut dyn Emitter,
        condition: Condition,
        reduction: Option<&Reduction>,
    ) -> Result<ValueId, RewriteError> {
        match condition {
            Condition::ScalarLikeAtLeast(count) => {
                let one = oracle::index_constant(emitter, 1)?;
                let zero = oracle::index_constant(emitter, 0)?;
                let mut total = zero;
                for element_count in &self.element_counts {
                    let is_one =
                        oracle::compare_index(emitter, *element_count, one, ComparisonOp::Equal)?;
                    let contribution = oracle::select_index(emitter, is_one, one, zero)?;
                    total = oracle::add_index(emitter, total, contribution)?;
                }
                let threshold = oracle::index_constant(emitter, count as i64)?;
                oracle::compare_index(emitter, total, threshold, ComparisonOp::GreaterEqual)
            }
            Condition::AllShapesEqual => oracle::shapes_equal(emitter, &self.shapes),
            Condition::MaxRankEquals(rank) => {
                let reduction = require_reduction(reduction)?;
                let expected = oracle::index_constant(emitter, rank as i64)?;
                oracle::compare_index(emitter, reduction.max_rank, expected, ComparisonOp::Equal)
            }
        }
    }

    /// Emits the reduced operands and their maximum rank, lowers `body` on them with an
    /// unranked result, and reshapes that result to the full broadcast shape.
    fn lower_reduced(
        &self,
        emitter: &mut dyn Emitter,
        body: &BranchTree,
        output: &TensorSpec,
    ) -> Result<ValueId, RewriteError> {
        let broadcast = oracle::broadcast_shape(emitter, &self.shapes)?;
        let reduced_shapes = oracle::minimum_broadcast_shapes(emitter, &self.shapes)?;

        let mut operands = Vec::with_capacity(reduced_shapes.len());
        for ((operand, ty), shape) in self
            .view
            .operands
            .iter()
            .zip(&self.view.operand_types)
            .zip(&reduced_shapes)
        {
            operands.push(oracle::dynamic_reshape(
                emitter,
                operand.clone(),
                shape.clone(),
                TensorSpec::unranked(ty.dtype),
            )?);
        }

        let mut max_rank: Option<ValueId> = None;
        for shape in &reduced_shapes {
            let rank = oracle::rank(emitter, shape.clone())?;
            max_rank = Some(match max_rank {
                None => rank,
                Some(current) => {
                    let greater =
                        oracle::compare_index(emitter, rank, current, ComparisonOp::Greater)?;
                    oracle::select_index(emitter, greater, rank, current)?
                }
            });
        }
        let max_rank = max_rank.ok_or_else(missing_operands)?;

        let reduction = Reduction {
            operands,
            shapes: reduced_shapes,
            max_rank,
        };
        let unranked = TensorSpec::unranked(output.dtype);
        let specialized = self.lower(emitter, body, Some(&reduction), &unranked)?;
        oracle::dynamic_reshape(emitter, specialized, broadcast, output.clone())
    }

    fn apply(
        &self,
        emitter: &mut dyn Emitter,
        strategy: Strategy,
        reduction: Option<&Reduction>,
        output: &TensorSpec,
    ) -> Result<ValueId, RewriteError> {
        match strategy {
            Strategy::ScalarLikeFlatten => {
                let mut flattened = Vec::with_capacity(self.view.operands.len());
                for ((operand, ty), element_count) in self
                    .view
                    .operands
                    .iter()
                    .zip(&self.view.operand_types)
                    .zip(&self.element_counts)
                {
                    let flat_shape =
                        oracle::from_elements(emitter, &[Operand::Value(*element_count)])?;
                    let reshaped = oracle::dynamic_reshape(
                        emitter,
                        operand.clone(),
                        flat_shape,
                        TensorSpec::dynamic(ty.dtype, 1),
                    )?;
                    flattened.push(Operand::Value(reshaped));
                }
                let flat_result = emitter.emit(
                    self.op.clone(),
                    flattened,
                    ValueType::Tensor(TensorSpec::dynamic(output.dtype, 1)),
                )?;
                let broadcast = oracle::broadcast_shape(emitter, &self.shapes)?;
                oracle::dynamic_reshape(emitter, flat_result, broadcast, output.clone())
            }
            Strategy::SameShapeElementwise => {
                let shape = self.shapes.first().cloned().ok_or_else(missing_operands)?;
                emit_flatten_apply_restore(
                    emitter,
                    self.counterpart.clone(),
                    &self.view.operands,
                    &self.view.operand_types,
                    output,
                    Some(shape),
                )
            }
            Strategy::Specialized { rank } => {
                let reduction = require_reduction(reduction)?;
                let ones = oracle::const_shape(emitter, &vec![1usize; rank])?;
                let mut specialized = Vec::with_capacity(reduction.operands.len());
                for ((operand, shape), ty) in reduction
                    .operands
                    .iter()
                    .zip(&reduction.shapes)
                    .zip(&self.view.operand_types)
                {
                    let padded =
                        oracle::broadcast_shape(emitter, &[shape.clone(), Operand::Value(ones)])?;
                    let padded =
                        oracle::tensor_cast(emitter, padded, extent_tensor_spec_of_rank(rank))?;
                    let reshaped = oracle::dynamic_reshape(
                        emitter,
                        *operand,
                        padded,
                        TensorSpec::dynamic(ty.dtype, rank),
                    )?;
                    specialized.push(Operand::Value(reshaped));
                }
                let result = emitter.emit(
                    self.op.clone(),
                    specialized,
                    ValueType::Tensor(TensorSpec::dynamic(output.dtype, rank)),
                )?;
                oracle::tensor_cast(emitter, result, output.clone())
            }
        }
    }
}

fn missing_operands() -> RewriteError {
    RewriteError::InvalidPlan {
        reason: "rank specialization of an operation without operands",
    }
}

fn require_reduction(reduction: Option<&Reduction>) -> Result<&Reduction, RewriteError> {
    reduction.ok_or(RewriteError::InvalidPlan {
        reason: "rank ladder lowered outside of a reduced region",
    })
}
