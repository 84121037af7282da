//! Decision tree for rank specialization of broadcasting ops.
//!
//! The tree is planned once per arity and ceiling. The emitter lowers it to nested
//! `cond` regions and [`BranchTree::select`] evaluates it on concrete shapes, which is
//! what the lowered IR computes at runtime.

use thiserror::Error;

use crate::shape::{self, ShapeError};

/// Predicate tested by a [`BranchTree::Guard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// At least this many operands have exactly one element.
    ScalarLikeAtLeast(usize),
    /// Every operand shape equals the first.
    AllShapesEqual,
    /// The maximum rank of the reduced shapes equals the value.
    MaxRankEquals(usize),
}

/// Computation performed at a leaf of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Flatten every operand by its own element count and broadcast 1-D values.
    ScalarLikeFlatten,
    /// Apply the element-wise counterpart on flattened operands.
    SameShapeElementwise,
    /// Apply the op on operands reshaped to this rank.
    Specialized { rank: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchTree {
    Guard {
        condition: Condition,
        then_branch: Box<BranchTree>,
        else_branch: Box<BranchTree>,
    },
    /// Computes reduced shapes and their maximum rank, then continues with the body.
    Reduced(Box<BranchTree>),
    /// Fails at runtime unless the reduced maximum rank equals `rank`.
    AssertRank { rank: usize, body: Box<BranchTree> },
    Apply(Strategy),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    #[error("Input for dynamic binary op lowering was of a rank greater than {ceiling}")]
    CapacityExceeded { rank: usize, ceiling: usize },
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Message of the runtime assertion guarding the last rung of the ladder.
pub fn capacity_message(ceiling: usize) -> String {
    DecisionError::CapacityExceeded {
        rank: ceiling + 1,
        ceiling,
    }
    .to_string()
}

/// Plans the specialization ladder for an op with `arity` operands.
///
/// The order is fixed: scalar-like operands first, then identical shapes, then one
/// rung per reduced rank from 1 up to `ceiling`. The last rung asserts the rank.
pub fn plan_rank_specialization(arity: usize, ceiling: usize) -> BranchTree {
    let ceiling = ceiling.max(1);
    let mut ladder = BranchTree::AssertRank {
        rank: ceiling,
        body: Box::new(BranchTree::Apply(Strategy::Specialized { rank: ceiling })),
    };
    for rank in (1..ceiling).rev() {
        ladder = BranchTree::Guard {
            condition: Condition::MaxRankEquals(rank),
            then_branch: Box::new(BranchTree::Apply(Strategy::Specialized { rank })),
            else_branch: Box::new(ladder),
        };
    }

    BranchTree::Guard {
        condition: Condition::ScalarLikeAtLeast(arity.saturating_sub(1)),
        then_branch: Box::new(BranchTree::Apply(Strategy::ScalarLikeFlatten)),
        else_branch: Box::new(BranchTree::Guard {
            condition: Condition::AllShapesEqual,
            then_branch: Box::new(BranchTree::Apply(Strategy::SameShapeElementwise)),
            else_branch: Box::new(BranchTree::Reduced(Box::new(ladder))),
        }),
    }
}

struct Evaluation<'s> {
    shapes: &'s [Vec<usize>],
    max_reduced_rank: Option<usize>,
}

impl Evaluation<'_> {
    fn test(&self, condition: Condition) -> bool {
        match condition {
            Condition::ScalarLikeAtLeast(count) => {
                self.shapes
                    .iter()
                    .filter(|shape| shape::is_scalar_like(shape))
                    .count()
                    >= count
            }
            Condition::AllShapesEqual => self
                .shapes
                .split_first()
                .map_or(true, |(first, rest)| rest.iter().all(|shape| shape == first)),
            Condition::MaxRankEquals(rank) => self.max_reduced_rank == Some(rank),
        }
    }
}

impl BranchTree {
    /// Returns the strategy the lowered IR executes for operands of these shapes.
    pub fn select(&self, shapes: &[Vec<usize>]) -> Result<Strategy, DecisionError> {
        let mut evaluation = Evaluation {
            shapes,
            max_reduced_rank: None,
        };
        self.select_with(&mut evaluation)
    }

    fn select_with(&self, evaluation: &mut Evaluation<'_>) -> Result<Strategy, DecisionError> {
        match self {
            BranchTree::Guard {
                condition,
                then_branch,
                else_branch,
            } => {
                if evaluation.test(*condition) {
                    then_branch.select_with(evaluation)
                } else {
                    else_branch.select_with(evaluation)
                }
            }
            BranchTree::Reduced(body) => {
                shape::broadcast_shapes(evaluation.shapes)?;
                let reduced = shape::minimum_broadcast_shapes(evaluation.shapes);
                evaluation.max_reduced_rank = Some(shape::extents::max_rank(&reduced));
                body.select_with(evaluation)
            }
            BranchTree::AssertRank { rank, body } => {
                let actual = evaluation.max_reduced_rank.unwrap_or(0);
                if actual != *rank {
                    return Err(DecisionError::CapacityExceeded {
                        rank: actual,
                        ceiling: *rank,
                    });
                }
                body.select_with(evaluation)
            }
            BranchTree::Apply(strategy) => Ok(*strategy),
        }
    }

    /// Number of `cond` regions the lowered tree contains.
    pub fn region_count(&self) -> usize {
        match self {
            BranchTree::Guard {
                then_branch,
                else_branch,
                ..
            } => 2 + then_branch.region_count() + else_branch.region_count(),
            BranchTree::Reduced(body) | BranchTree::AssertRank { body, .. } => body.region_count(),
            BranchTree::Apply(_) => 0,
        }
    }
}
