mod unranked_support;

use std::sync::Arc;

use rankspec::conversion::{ConversionError, OperationKind};
use rankspec::ir::spec::{
    BackendError, CastSpec, CompareSpec, ComparisonOp, DType, ElementwiseBinaryOp,
    ElementwiseUnaryOp, Operation, Program, TensorSpec,
};
use rankspec::transforms::{
    plan_rank_specialization, KindCapability, KindRegistry, OpCapability, OpContract,
    RankCeilings,
};
use rankspec::{FunctionPass, TransformUnrankedPass};
use unranked_support::{
    assert_rewrite_preserves, checked_config, count_ops, default_pass, mask, ramp_f32, run,
    single_op_function, transform, unranked,
};

fn add_function() -> rankspec::Function {
    single_op_function(
        "add",
        Operation::BroadcastBinary(ElementwiseBinaryOp::Add),
        &[unranked(DType::F32), unranked(DType::F32)],
        unranked(DType::F32),
    )
}

/// Operand shapes whose is-1 patterns alternate, so no axis can be merged away.
fn alternating(rank: usize, even: usize, odd: usize) -> Vec<usize> {
    (0..rank)
        .map(|axis| if axis % 2 == 0 { even } else { odd })
        .collect()
}

#[test]
fn flatten_handles_unary_at_every_rank() {
    let function = single_op_function(
        "neg",
        Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg),
        &[unranked(DType::F32)],
        unranked(DType::F32),
    );
    let cases: [&[usize]; 6] = [&[], &[3], &[2, 3], &[2, 1, 3], &[2, 2, 1, 3], &[0, 4]];
    for dims in cases {
        let out = assert_rewrite_preserves(&function, &[ramp_f32(dims, 1.0)]);
        assert_eq!(out[0].dims().expect("dims"), dims.to_vec());
    }

    let mut rewritten = function.clone();
    transform(&mut rewritten);
    assert_eq!(
        count_ops(&rewritten, |op| matches!(op, Operation::Cond(_))),
        0
    );
    assert_eq!(
        count_ops(&rewritten, |op| matches!(op, Operation::ElementwiseUnary(_))),
        1
    );
}

#[test]
fn flatten_covers_binary_compare_select_and_cast() {
    let sub = single_op_function(
        "sub",
        Operation::ElementwiseBinary(ElementwiseBinaryOp::Sub),
        &[unranked(DType::F32), unranked(DType::F32)],
        unranked(DType::F32),
    );
    let less = single_op_function(
        "less",
        Operation::Compare(CompareSpec {
            op: ComparisonOp::Less,
        }),
        &[unranked(DType::F32), unranked(DType::F32)],
        unranked(DType::I1),
    );
    let select = single_op_function(
        "select",
        Operation::Select,
        &[
            unranked(DType::I1),
            unranked(DType::F32),
            unranked(DType::F32),
        ],
        unranked(DType::F32),
    );
    let cast = single_op_function(
        "cast",
        Operation::Cast(CastSpec { dtype: DType::Si32 }),
        &[unranked(DType::F32)],
        unranked(DType::Si32),
    );

    let cases: [&[usize]; 4] = [&[], &[4], &[2, 3], &[2, 1, 2, 2]];
    for dims in cases {
        let lhs = ramp_f32(dims, 0.0);
        let rhs = ramp_f32(dims, 0.75);
        assert_rewrite_preserves(&sub, &[lhs.clone(), rhs.clone()]);
        assert_rewrite_preserves(&less, &[lhs.clone(), rhs.clone()]);
        assert_rewrite_preserves(&select, &[mask(dims), lhs.clone(), rhs]);
        assert_rewrite_preserves(&cast, &[lhs]);
    }
}

#[test]
fn flatten_accepts_mixed_ranked_and_unranked_operands() {
    let function = single_op_function(
        "mixed",
        Operation::ElementwiseBinary(ElementwiseBinaryOp::Mul),
        &[TensorSpec::dynamic(DType::F32, 2), unranked(DType::F32)],
        TensorSpec::dynamic(DType::F32, 2),
    );
    let inputs = [ramp_f32(&[2, 3], 1.0), ramp_f32(&[2, 3], 2.0)];
    let out = assert_rewrite_preserves(&function, &inputs);
    assert_eq!(out[0].dims().expect("dims"), vec![2, 3]);
}

#[test]
fn scalar_operand_takes_scalar_broadcast_path() {
    let scalar = TensorSpec::scalar(DType::F32);
    let scalar_first = single_op_function(
        "scalar_lhs",
        Operation::BroadcastBinary(ElementwiseBinaryOp::Sub),
        &[scalar.clone(), unranked(DType::F32)],
        unranked(DType::F32),
    );
    let scalar_second = single_op_function(
        "scalar_rhs",
        Operation::BroadcastBinary(ElementwiseBinaryOp::Sub),
        &[unranked(DType::F32), scalar],
        unranked(DType::F32),
    );

    let cases: [&[usize]; 7] = [&[], &[0], &[1], &[4], &[2, 3], &[2, 0, 3], &[1, 2, 3, 4]];
    for dims in cases {
        let value = ramp_f32(dims, 1.0);
        let s = ramp_f32(&[], 10.0);
        let out = assert_rewrite_preserves(&scalar_first, &[s.clone(), value.clone()]);
        assert_eq!(out[0].dims().expect("dims"), dims.to_vec());
        assert_rewrite_preserves(&scalar_second, &[value, s]);
    }

    let mut rewritten = scalar_first.clone();
    let result = transform(&mut rewritten);
    assert_eq!(result.rewrites_applied, 1);
    assert_eq!(
        count_ops(&rewritten, |op| matches!(op, Operation::Cond(_))),
        0
    );
    assert_eq!(
        count_ops(&rewritten, |op| matches!(op, Operation::BroadcastBinary(_))),
        1
    );
}

#[test]
fn unit_operands_produce_single_element() {
    let function = add_function();
    let out = assert_rewrite_preserves(&function, &[ramp_f32(&[1], 2.0), ramp_f32(&[1], 3.0)]);
    assert_eq!(out[0].dims().expect("dims"), vec![1]);
    assert_eq!(out[0].as_f32().expect("f32"), &[5.0]);

    let inputs = [ramp_f32(&[1, 1, 1], 2.0), ramp_f32(&[2, 3], 0.0)];
    let out = assert_rewrite_preserves(&function, &inputs);
    assert_eq!(out[0].dims().expect("dims"), vec![1, 2, 3]);
}

#[test]
fn broadcasting_cases_match_direct_evaluation() {
    let function = add_function();
    let cases: [(&[usize], &[usize], &[usize]); 6] = [
        (&[2, 3], &[2, 3], &[2, 3]),
        (&[2, 3], &[3], &[2, 3]),
        (&[3, 1], &[1, 4], &[3, 4]),
        (&[1, 2, 3], &[2, 3], &[1, 2, 3]),
        (&[0, 3], &[1, 3], &[0, 3]),
        (&[1, 1, 2, 3, 4, 5, 6], &[6], &[1, 1, 2, 3, 4, 5, 6]),
    ];
    for (lhs, rhs, expected) in cases {
        let out = assert_rewrite_preserves(&function, &[ramp_f32(lhs, 0.0), ramp_f32(rhs, 1.0)]);
        assert_eq!(out[0].dims().expect("dims"), expected.to_vec());
    }
}

#[test]
fn broadcast_compare_yields_predicates() {
    let function = single_op_function(
        "less",
        Operation::BroadcastCompare(CompareSpec {
            op: ComparisonOp::Less,
        }),
        &[unranked(DType::F32), unranked(DType::F32)],
        unranked(DType::I1),
    );
    let inputs = [ramp_f32(&[2, 1], 0.0), ramp_f32(&[1, 3], 0.25)];
    let out = assert_rewrite_preserves(&function, &inputs);
    assert_eq!(
        out[0].as_bool().expect("predicates"),
        vec![true, true, true, false, true, true]
    );
}

#[test]
fn binary_ladder_covers_every_rank_up_to_ceiling() {
    let function = add_function();
    for rank in 1..=5 {
        let lhs = alternating(rank, 2, 1);
        let rhs = alternating(rank, 1, 3);
        let out = assert_rewrite_preserves(&function, &[ramp_f32(&lhs, 0.0), ramp_f32(&rhs, 1.0)]);
        let expected = alternating(rank, 2, 3);
        assert_eq!(out[0].dims().expect("dims"), expected);
    }
}

#[test]
fn select_ladder_covers_every_rank_up_to_ceiling() {
    let function = single_op_function(
        "select",
        Operation::BroadcastSelect,
        &[
            unranked(DType::I1),
            unranked(DType::F32),
            unranked(DType::F32),
        ],
        unranked(DType::F32),
    );
    for rank in 1..=8 {
        let pred = mask(&alternating(rank, 2, 1));
        let on_true = ramp_f32(&alternating(rank, 1, 2), 0.0);
        let on_false = ramp_f32(&vec![2; rank], 100.0);
        let out = assert_rewrite_preserves(&function, &[pred, on_true, on_false]);
        assert_eq!(out[0].dims().expect("dims"), vec![2; rank]);
    }
}

#[test]
fn reduced_rank_above_ceiling_fails_the_assertion() {
    let mut function = add_function();
    transform(&mut function);
    let lhs = ramp_f32(&alternating(6, 2, 1), 0.0);
    let rhs = ramp_f32(&alternating(6, 1, 2), 0.0);
    let err = run(&function, &[lhs, rhs]).expect_err("rank 6 exceeds the binary ceiling");
    match err {
        BackendError::AssertionFailed { message } => assert_eq!(
            message,
            "Input for dynamic binary op lowering was of a rank greater than 5"
        ),
        other => panic!("unexpected error: {other}"),
    }

    let mut select = single_op_function(
        "select",
        Operation::BroadcastSelect,
        &[
            unranked(DType::I1),
            unranked(DType::F32),
            unranked(DType::F32),
        ],
        unranked(DType::F32),
    );
    transform(&mut select);
    let inputs = [
        mask(&alternating(9, 2, 1)),
        ramp_f32(&alternating(9, 1, 2), 0.0),
        ramp_f32(&[2; 9], 0.0),
    ];
    let err = run(&select, &inputs).expect_err("rank 9 exceeds the n-ary ceiling");
    let BackendError::AssertionFailed { message } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(message.ends_with("greater than 8"), "{message}");
}

#[test]
fn ladder_structure_matches_the_plan() {
    let mut function = add_function();
    transform(&mut function);
    let plan = plan_rank_specialization(2, 5);
    let conds = count_ops(&function, |op| matches!(op, Operation::Cond(_)));
    assert_eq!(conds * 2, plan.region_count());
    assert_eq!(
        count_ops(&function, |op| matches!(op, Operation::Assert(_))),
        1
    );
    assert_eq!(
        count_ops(&function, |op| matches!(op, Operation::MinimumBroadcastShapes)),
        1
    );
}

struct CappedAdd;

impl OpCapability for CappedAdd {
    fn kind(&self) -> OperationKind {
        OperationKind::BroadcastBinary
    }

    fn arity(&self) -> usize {
        2
    }

    fn contract(&self) -> OpContract {
        OpContract::Broadcasting
    }

    fn rank_ceiling(&self, _ceilings: &RankCeilings) -> usize {
        3
    }
}

#[test]
fn per_kind_ceiling_overrides_the_default() {
    let mut registry = KindRegistry::new();
    registry.register(CappedAdd);
    let pass = TransformUnrankedPass::new(
        Arc::new(registry),
        RankCeilings::default(),
        checked_config(),
    );

    let original = add_function();
    let mut function = original.clone();
    pass.run(&mut function).expect("transform");

    let lhs = ramp_f32(&alternating(3, 2, 1), 0.0);
    let rhs = ramp_f32(&alternating(3, 1, 2), 0.0);
    let expected = run(&original, &[lhs.clone(), rhs.clone()]).expect("original");
    let actual = run(&function, &[lhs, rhs]).expect("rank 3 is within the override");
    assert_eq!(actual, expected);

    let err = run(
        &function,
        &[
            ramp_f32(&alternating(4, 2, 1), 0.0),
            ramp_f32(&alternating(4, 1, 2), 0.0),
        ],
    )
    .expect_err("rank 4 exceeds the override");
    assert!(matches!(
        err,
        BackendError::AssertionFailed { ref message } if message.ends_with("greater than 3")
    ));

    let with_builtin = KindCapability::broadcasting(OperationKind::BroadcastBinary, 2, |_| None)
        .with_rank_ceiling(2);
    assert_eq!(with_builtin.rank_ceiling(&RankCeilings::default()), 2);
}

#[test]
fn ranked_programs_are_left_alone() {
    let original = single_op_function(
        "ranked",
        Operation::BroadcastBinary(ElementwiseBinaryOp::Add),
        &[
            TensorSpec::dynamic(DType::F32, 2),
            TensorSpec::dynamic(DType::F32, 1),
        ],
        TensorSpec::dynamic(DType::F32, 2),
    );
    let mut function = original.clone();
    let result = transform(&mut function);
    assert!(!result.changed);
    assert_eq!(result.rewrites_applied, 0);
    assert_eq!(function, original);
}

#[test]
fn second_run_finds_nothing_to_rewrite() {
    let mut function = add_function();
    let first = transform(&mut function);
    assert!(first.changed);
    assert_eq!(first.rewrites_applied, 1);

    let snapshot = function.clone();
    let second = transform(&mut function);
    assert!(!second.changed);
    assert_eq!(function, snapshot);
}

#[test]
fn unmatched_kind_reports_a_diagnostic() {
    let mut registry = KindRegistry::new();
    // Declared with the wrong arity so no rewrite accepts it.
    registry.register(KindCapability::elementwise(OperationKind::BroadcastBinary, 3));
    let pass = TransformUnrankedPass::new(
        Arc::new(registry),
        RankCeilings::default(),
        checked_config(),
    );

    let mut function = add_function();
    let err = pass.run(&mut function).expect_err("no pattern applies");
    match &err {
        ConversionError::Illegal { function, report } => {
            assert_eq!(function, "add");
            assert_eq!(report.diagnostics.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    let message = &err.diagnostics()[0].message;
    assert!(
        message.starts_with("failed to legalize operation broadcast_binary"),
        "{message}"
    );
}

#[test]
fn program_pass_rewrites_all_functions_and_round_trips() {
    let neg = single_op_function(
        "neg",
        Operation::ElementwiseUnary(ElementwiseUnaryOp::Abs),
        &[unranked(DType::F32)],
        unranked(DType::F32),
    );
    let mut program = Program::new("add").with_functions(vec![add_function(), neg]);
    let result = default_pass()
        .run_on_program(&mut program)
        .expect("program pass");
    assert_eq!(result.rewrites_applied, 2);
    assert_eq!(result.iterations, 2);

    let text = program.to_json_string().expect("serialize");
    let restored = Program::from_json_str(&text).expect("deserialize");
    assert_eq!(restored, program);

    let entry = restored.entry_function().expect("entry");
    let out = run(entry, &[ramp_f32(&[3, 1], 0.0), ramp_f32(&[1, 4], 1.0)]).expect("run");
    assert_eq!(out[0].dims().expect("dims"), vec![3, 4]);
}
