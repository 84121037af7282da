//! Capability table for the operation kinds the rank-specialization patterns handle.

use std::collections::HashMap;
use std::sync::Arc;

use crate::conversion::OperationKind;
use crate::env;
use crate::ir::spec::Operation;

/// Maximum rank a binary broadcasting op is specialized for.
pub const DEFAULT_BINARY_RANK_CEILING: usize = 5;
/// Maximum rank a broadcasting op with more than two operands is specialized for.
pub const DEFAULT_NARY_RANK_CEILING: usize = 8;

/// Per-arity rank ceilings for the specialization ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankCeilings {
    pub binary: usize,
    pub nary: usize,
}

impl Default for RankCeilings {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY_RANK_CEILING,
            nary: DEFAULT_NARY_RANK_CEILING,
        }
    }
}

impl RankCeilings {
    /// Defaults overridden by `RANKSPEC_BINARY_RANK_CEILING` / `RANKSPEC_NARY_RANK_CEILING`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            binary: env::binary_rank_ceiling_override().unwrap_or(defaults.binary),
            nary: env::nary_rank_ceiling_override().unwrap_or(defaults.nary),
        }
    }

    pub fn for_arity(&self, arity: usize) -> usize {
        if arity > 2 {
            self.nary
        } else {
            self.binary
        }
    }
}

/// How an operation treats operand shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpContract {
    /// Operands share one shape; the result has that shape.
    Elementwise,
    /// Operands are broadcast against each other; the result has the broadcast shape.
    Broadcasting,
}

/// What the rewrites need to know about an operation kind.
pub trait OpCapability: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Number of tensor operands.
    fn arity(&self) -> usize;

    fn contract(&self) -> OpContract;

    /// Builds a new instance of the operation, carrying the template's attributes verbatim.
    fn instantiate(&self, template: &Operation) -> Operation {
        template.clone()
    }

    /// Same computation without broadcasting, when such a form exists.
    fn elementwise_counterpart(&self, template: &Operation) -> Option<Operation> {
        let _ = template;
        None
    }

    fn rank_ceiling(&self, ceilings: &RankCeilings) -> usize {
        ceilings.for_arity(self.arity())
    }
}

/// Table-driven [`OpCapability`] used for the built-in kinds.
pub struct KindCapability {
    kind: OperationKind,
    arity: usize,
    contract: OpContract,
    counterpart: Option<fn(&Operation) -> Option<Operation>>,
    ceiling: Option<usize>,
}

impl KindCapability {
    pub fn elementwise(kind: OperationKind, arity: usize) -> Self {
        Self {
            kind,
            arity,
            contract: OpContract::Elementwise,
            counterpart: None,
            ceiling: None,
        }
    }

    pub fn broadcasting(
        kind: OperationKind,
        arity: usize,
        counterpart: fn(&Operation) -> Option<Operation>,
    ) -> Self {
        Self {
            kind,
            arity,
            contract: OpContract::Broadcasting,
            counterpart: Some(counterpart),
            ceiling: None,
        }
    }

    /// Overrides the arity-derived ceiling for this kind.
    pub fn with_rank_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = Some(ceiling);
        self
    }
}

impl OpCapability for KindCapability {
    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn arity(&self) -> usize {
        self.arity
    }

    fn contract(&self) -> OpContract {
        self.contract
    }

    fn elementwise_counterpart(&self, template: &Operation) -> Option<Operation> {
        self.counterpart.and_then(|counterpart| counterpart(template))
    }

    fn rank_ceiling(&self, ceilings: &RankCeilings) -> usize {
        self.ceiling.unwrap_or_else(|| ceilings.for_arity(self.arity))
    }
}

fn binary_counterpart(op: &Operation) -> Option<Operation> {
    match op {
        Operation::BroadcastBinary(kind) => Some(Operation::ElementwiseBinary(*kind)),
        _ => None,
    }
}

fn compare_counterpart(op: &Operation) -> Option<Operation> {
    match op {
        Operation::BroadcastCompare(spec) => Some(Operation::Compare(spec.clone())),
        _ => None,
    }
}

fn select_counterpart(op: &Operation) -> Option<Operation> {
    match op {
        Operation::BroadcastSelect => Some(Operation::Select),
        _ => None,
    }
}

/// Maps operation kinds to their capabilities.
#[derive(Clone, Default)]
pub struct KindRegistry {
    entries: HashMap<OperationKind, Arc<dyn OpCapability>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every element-wise and broadcasting compute kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(KindCapability::elementwise(OperationKind::ElementwiseUnary, 1))
            .register(KindCapability::elementwise(OperationKind::ElementwiseBinary, 2))
            .register(KindCapability::elementwise(OperationKind::Compare, 2))
            .register(KindCapability::elementwise(OperationKind::Select, 3))
            .register(KindCapability::elementwise(OperationKind::Cast, 1))
            .register(KindCapability::broadcasting(
                OperationKind::BroadcastBinary,
                2,
                binary_counterpart,
            ))
            .register(KindCapability::broadcasting(
                OperationKind::BroadcastCompare,
                2,
                compare_counterpart,
            ))
            .register(KindCapability::broadcasting(
                OperationKind::BroadcastSelect,
                3,
                select_counterpart,
            ));
        registry
    }

    /// Adds or replaces the capability for its kind.
    pub fn register(&mut self, capability: impl OpCapability + 'static) -> &mut Self {
        self.entries.insert(capability.kind(), Arc::new(capability));
        self
    }

    pub fn get(&self, kind: OperationKind) -> Option<&Arc<dyn OpCapability>> {
        self.entries.get(&kind)
    }

    pub fn lookup(&self, op: &Operation) -> Option<&Arc<dyn OpCapability>> {
        self.get(OperationKind::from_op(op))
    }

    pub fn kinds(&self) -> impl Iterator<Item = OperationKind> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::spec::{CompareSpec, ComparisonOp, ElementwiseBinaryOp};

    #[test]
    fn ceilings_follow_arity() {
        let registry = KindRegistry::with_defaults();
        let ceilings = RankCeilings::default();
        let binary = registry
            .get(OperationKind::BroadcastBinary)
            .expect("binary registered");
        let select = registry
            .get(OperationKind::BroadcastSelect)
            .expect("select registered");
        assert_eq!(binary.rank_ceiling(&ceilings), 5);
        assert_eq!(select.rank_ceiling(&ceilings), 8);
    }

    #[test]
    fn override_replaces_ceiling() {
        let mut registry = KindRegistry::with_defaults();
        registry.register(
            KindCapability::broadcasting(OperationKind::BroadcastBinary, 2, binary_counterpart)
                .with_rank_ceiling(3),
        );
        let binary = registry
            .get(OperationKind::BroadcastBinary)
            .expect("binary registered");
        assert_eq!(binary.rank_ceiling(&RankCeilings::default()), 3);
    }

    #[test]
    fn counterparts_keep_attributes() {
        let registry = KindRegistry::with_defaults();
        let compare = Operation::BroadcastCompare(CompareSpec {
            op: ComparisonOp::GreaterEqual,
        });
        let capability = registry.lookup(&compare).expect("compare registered");
        assert_eq!(
            capability.elementwise_counterpart(&compare),
            Some(Operation::Compare(CompareSpec {
                op: ComparisonOp::GreaterEqual,
            }))
        );
        let add = Operation::ElementwiseBinary(ElementwiseBinaryOp::Add);
        let capability = registry.lookup(&add).expect("add registered");
        assert_eq!(capability.contract(), OpContract::Elementwise);
        assert_eq!(capability.elementwise_counterpart(&add), None);
    }
}
