use std::sync::Arc;

use tracing::info;

use crate::conversion::{
    apply_partial_conversion, ConversionConfig, ConversionError, RankedOperandsPolicy,
};
use crate::env;
use crate::ir::{
    pattern::{FrozenPatternSet, PatternSet},
    spec::{Function, Program},
};

use super::{
    populate_transform_unranked_patterns, FunctionPass, KindRegistry, PassResult, RankCeilings,
};

/// Replaces every registered compute op that has an unranked operand with ranked code.
pub struct TransformUnrankedPass {
    registry: Arc<KindRegistry>,
    ceilings: RankCeilings,
    config: ConversionConfig,
}

impl TransformUnrankedPass {
    const NAME: &'static str = "transform-unranked";

    pub fn new(
        registry: Arc<KindRegistry>,
        ceilings: RankCeilings,
        config: ConversionConfig,
    ) -> Self {
        Self {
            registry,
            ceilings,
            config,
        }
    }

    pub fn patterns(&self) -> FrozenPatternSet {
        let mut patterns = PatternSet::new();
        populate_transform_unranked_patterns(&self.registry, self.ceilings, &mut patterns);
        patterns.freeze()
    }

    /// Policy under which every registered kind needs ranked operands.
    pub fn policy(&self) -> RankedOperandsPolicy {
        RankedOperandsPolicy::new(self.registry.kinds())
    }

    /// Runs the pass on every function of `program`; stops at the first failing function.
    pub fn run_on_program(&self, program: &mut Program) -> Result<PassResult, ConversionError> {
        let mut result = PassResult::default();
        for function in &mut program.functions {
            result = result.merge(self.run(function)?);
        }
        Ok(result)
    }
}

impl Default for TransformUnrankedPass {
    fn default() -> Self {
        Self::new(
            Arc::new(KindRegistry::with_defaults()),
            RankCeilings::from_env(),
            ConversionConfig::default(),
        )
    }
}

impl FunctionPass for TransformUnrankedPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[tracing::instrument(skip_all, fields(pass = Self::NAME, function = %function.name))]
    fn run(&self, function: &mut Function) -> Result<PassResult, ConversionError> {
        let patterns = self.patterns();
        let policy = self.policy();
        let stats = apply_partial_conversion(function, &patterns, &policy, &self.config)?;
        if env::pass_stats_enabled() {
            info!(
                visited = stats.visited,
                illegal = stats.illegal,
                applied = stats.applied,
                regions = stats.regions,
                "transform-unranked finished"
            );
        }
        Ok(PassResult {
            changed: stats.applied > 0,
            iterations: 1,
            rewrites_applied: stats.applied,
            erased_insts: stats.applied,
        })
    }
}
