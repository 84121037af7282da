use std::sync::Arc;

use crate::ir::{
    builder::{Emitter, InsertionPoint},
    pattern::OpRewritePattern,
    rewriter::{ProgramRewriter, RewriteError},
    spec::{Operand, TensorSpec, ValueType},
};
use crate::shape::oracle;

use super::{KindRegistry, OpContract, UnrankedOpView};

/// Binary broadcasting op where one operand is a ranked scalar and the other is unranked.
///
/// The unranked operand is flattened to 1-D so the op broadcasts a rank-0 tensor against
/// a rank-1 tensor, then the result is reshaped to the unranked operand's shape.
pub struct ScalarBroadcastPattern {
    registry: Arc<KindRegistry>,
}

impl ScalarBroadcastPattern {
    pub fn new(registry: Arc<KindRegistry>) -> Self {
        Self { registry }
    }
}

fn is_ranked_scalar(spec: &TensorSpec) -> bool {
    spec.rank() == Some(0)
}

impl OpRewritePattern<UnrankedOpView> for ScalarBroadcastPattern {
    fn name(&self) -> &'static str {
        "scalar-broadcast"
    }

    fn benefit(&self) -> u16 {
        2
    }

    fn may_match(&self, view: &UnrankedOpView, _rewriter: &ProgramRewriter) -> bool {
        let Some(capability) = self.registry.lookup(&view.op) else {
            return false;
        };
        if capability.contract() != OpContract::Broadcasting || capability.arity() != 2 {
            return false;
        }
        let [lhs, rhs] = view.operand_types.as_slice() else {
            return false;
        };
        (is_ranked_scalar(lhs) && rhs.is_unranked()) ^ (lhs.is_unranked() && is_ranked_scalar(rhs))
    }

    fn match_and_rewrite(
        &self,
        view: UnrankedOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, RewriteError> {
        let Some(capability) = self.registry.lookup(&view.op) else {
            return Ok(false);
        };
        let non_scalar_index = if view.operand_types[0].is_unranked() {
            0
        } else {
            1
        };
        let non_scalar = view.operands[non_scalar_index].clone();
        let non_scalar_type = &view.operand_types[non_scalar_index];

        let replacement = {
            let mut at = InsertionPoint::new(rewriter, view.root);
            let emitter: &mut dyn Emitter = &mut at;
            let shape = oracle::shape_of(emitter, non_scalar.clone())?;
            let element_count = oracle::num_elements(emitter, shape)?;
            let flat_shape = oracle::from_elements(emitter, &[Operand::Value(element_count)])?;
            let flattened = oracle::dynamic_reshape(
                emitter,
                non_scalar,
                flat_shape,
                TensorSpec::dynamic(non_scalar_type.dtype, 1),
            )?;

            let mut operands = view.operands.clone();
            operands[non_scalar_index] = Operand::Value(flattened);
            let flat_result = emitter.emit(
                capability.instantiate(&view.op),
                operands,
                ValueType::Tensor(TensorSpec::dynamic(view.result_type.dtype, 1)),
            )?;
            oracle::dynamic_reshape(emitter, flat_result, shape, view.result_type.clone())?
        };
        rewriter.replace_op(view.root, replacement)?;
        Ok(true)
    }
}
