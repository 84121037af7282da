#![allow(dead_code)]

use std::sync::Arc;

use rankspec::conversion::{check_function_legality, ConversionConfig};
use rankspec::ir::spec::{
    BackendError, DType, Function, Operand, Operation, PortableBackend, ProgramBuilder,
    TensorSpec, ValueType,
};
use rankspec::transforms::{KindRegistry, RankCeilings};
use rankspec::{FunctionPass, PassResult, TransformUnrankedPass};
use rankspec_ref_cpu::{CpuPortableBackend, CpuTensor};

pub fn unranked(dtype: DType) -> TensorSpec {
    TensorSpec::unranked(dtype)
}

/// Single-instruction function `op(params...)` returning the op's value.
pub fn single_op_function(
    name: &str,
    op: Operation,
    params: &[TensorSpec],
    output: TensorSpec,
) -> Function {
    let mut builder = ProgramBuilder::new();
    let operands = params
        .iter()
        .map(|spec| Operand::Value(builder.add_parameter(ValueType::Tensor(spec.clone()))))
        .collect();
    let result = builder.emit_single(op, operands, ValueType::Tensor(output));
    builder
        .finish(name, vec![result])
        .expect("single op function")
}

pub fn checked_config() -> ConversionConfig {
    ConversionConfig {
        verify_after: true,
        ..ConversionConfig::default()
    }
}

pub fn default_pass() -> TransformUnrankedPass {
    TransformUnrankedPass::new(
        Arc::new(KindRegistry::with_defaults()),
        RankCeilings::default(),
        checked_config(),
    )
}

/// Runs the pass and checks that no registered op keeps an unranked operand.
pub fn transform(function: &mut Function) -> PassResult {
    let _ = tracing_subscriber::fmt::try_init();
    let pass = default_pass();
    let result = pass.run(function).expect("transform-unranked");
    check_function_legality(function, &pass.policy()).expect("rewritten function is legal");
    result
}

pub fn ramp_f32(dims: &[usize], offset: f32) -> CpuTensor {
    let count = dims.iter().product::<usize>();
    let values = (0..count)
        .map(|i| offset + i as f32 * 0.5)
        .collect::<Vec<_>>();
    CpuTensor::f32(dims, &values).expect("ramp tensor")
}

pub fn mask(dims: &[usize]) -> CpuTensor {
    let count = dims.iter().product::<usize>();
    let values = (0..count).map(|i| i % 3 != 1).collect::<Vec<_>>();
    CpuTensor::bool(dims, &values).expect("mask tensor")
}

pub fn run(function: &Function, inputs: &[CpuTensor]) -> Result<Vec<CpuTensor>, BackendError> {
    CpuPortableBackend::new().run_function(function, inputs)
}

/// Evaluates `function` before and after the pass and asserts identical results.
pub fn assert_rewrite_preserves(function: &Function, inputs: &[CpuTensor]) -> Vec<CpuTensor> {
    let expected = run(function, inputs).expect("original program evaluates");
    let mut rewritten = function.clone();
    transform(&mut rewritten);
    let actual = run(&rewritten, inputs).expect("rewritten program evaluates");
    assert_eq!(actual.len(), expected.len());
    let name = &function.name;
    for (actual, expected) in actual.iter().zip(&expected) {
        assert_eq!(
            actual.dims().expect("dims"),
            expected.dims().expect("dims"),
            "shape differs for {name}"
        );
        assert_eq!(actual.data, expected.data, "values differ for {name}");
    }
    actual
}

/// Counts instructions of `kind` in the body and all nested regions.
pub fn count_ops(function: &Function, predicate: impl Fn(&Operation) -> bool) -> usize {
    let mut count = 0;
    rankspec::ir::utils::walk_instructions(&function.body, &mut |instruction| {
        if predicate(&instruction.op) {
            count += 1;
        }
    });
    count
}
