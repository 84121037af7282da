use rankspec::ir::{
    builder::{emit_cond, InsertionPoint},
    index::InstId,
    rewriter::{ProgramRewriter, RewriteError},
    spec::{
        DType, ElementwiseUnaryOp, Function, Operand, Operation, ProgramBuilder, TensorSpec,
        ValueType,
    },
    utils::{predicate_spec, tensor_literal_zeros, tensor_spec_static, value_type_tensor},
};
use rankspec::shape::oracle;

/// `abs(neg(x))` over an unranked input.
fn chain_function() -> Function {
    let mut builder = ProgramBuilder::new();
    let ty = ValueType::Tensor(TensorSpec::unranked(DType::F32));
    let x = builder.add_parameter(ty.clone());
    let neg = builder.emit_single(
        Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg),
        vec![Operand::Value(x)],
        ty.clone(),
    );
    let abs = builder.emit_single(
        Operation::ElementwiseUnary(ElementwiseUnaryOp::Abs),
        vec![Operand::Value(neg)],
        ty,
    );
    builder.finish("chain", vec![abs]).expect("chain function")
}

#[test]
fn rewriter_replace_and_erase_instruction() {
    let mut function = chain_function();
    let param_id = function.parameter_ids[0];
    let first_value = function.body[0].id;
    let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");

    rewriter
        .replace_all_uses(first_value, param_id)
        .expect("replace uses");
    assert!(rewriter.users_of(first_value).is_empty());
    assert!(rewriter.users_of(param_id).contains(&InstId(1)));
    assert_eq!(rewriter.version(InstId(1)), Some(1));

    rewriter.erase_inst(InstId(0)).expect("erase");
    assert_eq!(rewriter.func.body.len(), 1);
    assert_eq!(rewriter.users_of(param_id), &[InstId(1)]);
    assert_eq!(
        rewriter.func.body[0].operands,
        vec![Operand::Value(param_id)]
    );
    assert!(rewriter.verify());
}

#[test]
fn erasing_a_used_value_is_rejected() {
    let mut function = chain_function();
    let first_value = function.body[0].id;
    let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");
    assert_eq!(
        rewriter.erase_inst(InstId(0)),
        Err(RewriteError::LiveUses { value: first_value })
    );
    assert_eq!(rewriter.func.body.len(), 2);
}

#[test]
fn rewriter_insert_and_materialize_constant() {
    let mut function = chain_function();
    let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");
    let const_spec = tensor_spec_static(DType::F32, &[1]);
    let literal = tensor_literal_zeros(const_spec.clone()).expect("static literal");

    let (const_inst, const_value) = rewriter
        .materialize_constant(InstId(0), literal.clone())
        .expect("materialize constant");
    assert_eq!(rewriter.op(const_inst), Some(&Operation::Constant(literal)));
    assert_eq!(rewriter.value_of(const_inst), Some(const_value));
    assert_eq!(rewriter.position(const_inst), Some(0));

    let (inserted_inst, inserted_value) = rewriter
        .insert_before(
            InstId(0),
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp),
            vec![Operand::Value(const_value)],
            value_type_tensor(const_spec),
        )
        .expect("insert rewrite");
    assert_eq!(rewriter.value_of(inserted_inst), Some(inserted_value));
    assert_eq!(rewriter.users_of(const_value), &[inserted_inst]);
    assert_eq!(rewriter.position(InstId(0)), Some(2));
    assert!(rewriter.verify());
}

#[test]
fn replace_op_redirects_function_results() {
    let mut function = chain_function();
    let param_id = function.parameter_ids[0];
    {
        let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");
        rewriter.replace_op(InstId(1), param_id).expect("replace");
        assert!(rewriter.verify());
    }
    assert_eq!(function.result_ids, vec![param_id]);
    assert_eq!(function.body.len(), 1);
}

#[test]
fn insertion_point_builds_cond_regions_with_fresh_ids() {
    let mut function = chain_function();
    let param_id = function.parameter_ids[0];
    let next = {
        let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");
        let next = rewriter.next_value();
        let mut at = InsertionPoint::new(&mut rewriter, InstId(1));
        let shape = oracle::shape_of(&mut at, param_id).expect("shape_of");
        let count = oracle::num_elements(&mut at, shape).expect("num_elements");
        let one = oracle::index_constant(&mut at, 1).expect("constant");
        let unit = oracle::compare_index(
            &mut at,
            count,
            one,
            rankspec::ir::spec::ComparisonOp::Equal,
        )
        .expect("compare");
        let ty = ValueType::Tensor(TensorSpec::unranked(DType::F32));
        emit_cond(
            &mut at,
            unit,
            ty,
            |region| {
                region.emit(
                    Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp),
                    vec![Operand::Value(param_id)],
                    ValueType::Tensor(TensorSpec::unranked(DType::F32)),
                )
            },
            |region| {
                region.emit(
                    Operation::ElementwiseUnary(ElementwiseUnaryOp::Log),
                    vec![Operand::Value(param_id)],
                    ValueType::Tensor(TensorSpec::unranked(DType::F32)),
                )
            },
        )
        .expect("cond");
        assert!(rewriter.verify());
        next
    };

    assert_eq!(function.body.len(), 7);
    let cond = &function.body[5];
    let Operation::Cond(spec) = &cond.op else {
        panic!("expected cond before the root, got {}", cond.op.mnemonic());
    };
    assert_eq!(cond.operands.len(), 1);
    assert!(spec.then_region.body[0].id.0 >= next.0);
    assert_ne!(spec.then_region.body[0].id, spec.else_region.body[0].id);
    assert_eq!(function.body[4].output, ValueType::Tensor(predicate_spec()));
}
