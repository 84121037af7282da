use std::sync::Arc;

use tracing::trace;

use crate::ir::{
    builder::{Emitter, InsertionPoint},
    pattern::OpRewritePattern,
    rewriter::{ProgramRewriter, RewriteError},
    spec::{Operand, Operation, TensorSpec, ValueId, ValueType},
};
use crate::shape::oracle;

use super::{KindRegistry, OpContract, UnrankedOpView};

/// Applies `op` to the operands viewed as 1-D tensors and reshapes the result back.
///
/// `shape` is the common extent tensor of the operands. When absent it is computed
/// from the operand shapes, combined with `shape_any` when there is more than one
/// operand. The operands are assumed to share that shape; nothing checks it at runtime.
pub fn emit_flatten_apply_restore(
    emitter: &mut dyn Emitter,
    op: Operation,
    operands: &[Operand],
    operand_types: &[TensorSpec],
    result_type: &TensorSpec,
    shape: Option<Operand>,
) -> Result<ValueId, RewriteError> {
    let shape = match shape {
        Some(shape) => shape,
        None => {
            let mut shapes = Vec::with_capacity(operands.len());
            for operand in operands {
                shapes.push(Operand::Value(oracle::shape_of(emitter, operand.clone())?));
            }
            match shapes.as_slice() {
                [single] => single.clone(),
                _ => Operand::Value(oracle::any_shape(emitter, &shapes)?),
            }
        }
    };

    let element_count = oracle::num_elements(emitter, shape.clone())?;
    let flat_shape = oracle::from_elements(emitter, &[Operand::Value(element_count)])?;

    let mut flattened = Vec::with_capacity(operands.len());
    for (operand, ty) in operands.iter().zip(operand_types) {
        let reshaped = oracle::dynamic_reshape(
            emitter,
            operand.clone(),
            flat_shape,
            TensorSpec::dynamic(ty.dtype, 1),
        )?;
        flattened.push(Operand::Value(reshaped));
    }

    let flat_result = emitter.emit(
        op,
        flattened,
        ValueType::Tensor(TensorSpec::dynamic(result_type.dtype, 1)),
    )?;
    oracle::dynamic_reshape(emitter, flat_result, shape, result_type.clone())
}

/// Rewrites an element-wise op with unranked operands into a 1-D op.
pub struct FlattenElementwisePattern {
    registry: Arc<KindRegistry>,
}

impl FlattenElementwisePattern {
    pub fn new(registry: Arc<KindRegistry>) -> Self {
        Self { registry }
    }
}

impl OpRewritePattern<UnrankedOpView> for FlattenElementwisePattern {
    fn name(&self) -> &'static str {
        "flatten-elementwise"
    }

    fn may_match(&self, view: &UnrankedOpView, _rewriter: &ProgramRewriter) -> bool {
        let Some(capability) = self.registry.lookup(&view.op) else {
            return false;
        };
        capability.contract() == OpContract::Elementwise
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
        trace!(
            op = view.op.mnemonic(),
            result = view.result.0,
            "flattening operation"
        );
        let op = capability.instantiate(&view.op);
        let replacement = {
            let mut at = InsertionPoint::new(rewriter, view.root);
            emit_flatten_apply_restore(
                &mut at,
                op,
                &view.operands,
                &view.operand_types,
                &view.result_type,
                None,
            )?
        };
        rewriter.replace_op(view.root, replacement)?;
        Ok(true)
    }
}
