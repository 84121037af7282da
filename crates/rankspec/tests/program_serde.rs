mod unranked_support;

use std::{
    env, fs,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use rankspec::conversion::check_program_legality;
use rankspec::ir::spec::{
    DType, ElementwiseBinaryOp, ElementwiseUnaryOp, Operation, Program, ProgramIoError,
    ProgramSerdeError, IR_VERSION,
};
use unranked_support::{default_pass, ramp_f32, run, single_op_function, unranked};

/// Two-function program after rank specialization.
fn specialized_program() -> Program {
    let add = single_op_function(
        "add",
        Operation::BroadcastBinary(ElementwiseBinaryOp::Add),
        &[unranked(DType::F32), unranked(DType::F32)],
        unranked(DType::F32),
    );
    let exp = single_op_function(
        "exp",
        Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp),
        &[unranked(DType::F32)],
        unranked(DType::F32),
    );
    let mut program = Program::new("add").with_functions(vec![add, exp]);
    let pass = default_pass();
    pass.run_on_program(&mut program).expect("program pass");
    check_program_legality(&program, &pass.policy()).expect("specialized program is legal");
    program
}

fn unique_path(ext: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    path.push(format!("rankspec_program_{timestamp}.{ext}"));
    path
}

#[test]
fn bincode_round_trip_preserves_specialized_program() {
    let program = specialized_program();
    let bytes = program.to_bincode_bytes().expect("bincode serialization");
    let parsed = Program::from_bincode_slice(&bytes).expect("bincode deserialization");
    assert_eq!(parsed, program);

    let entry = parsed.entry_function().expect("entry");
    let out = run(entry, &[ramp_f32(&[2, 1], 0.0), ramp_f32(&[1, 3], 1.0)]).expect("run");
    assert_eq!(out[0].dims().expect("dims"), vec![2, 3]);
}

#[test]
fn file_round_trip_json_and_bincode() {
    let program = specialized_program();
    let json_path = unique_path("json");
    let bin_path = unique_path("bin");

    program.save_json(&json_path).expect("save json");
    program.save_bincode(&bin_path).expect("save bincode");

    let from_json = Program::load_json(&json_path).expect("load json program");
    let from_bincode = Program::load_bincode(&bin_path).expect("load bincode program");
    assert_eq!(from_json, program);
    assert_eq!(from_bincode, program);

    let _ = fs::remove_file(json_path);
    let _ = fs::remove_file(bin_path);
}

#[test]
fn bincode_rejects_foreign_ir_version() {
    let mut program = specialized_program();
    program.ir_version = "rankspec.v0".to_string();
    let bytes = program.to_bincode_bytes().expect("bincode serialization");
    let err = Program::from_bincode_slice(&bytes).expect_err("version mismatch");
    match err {
        ProgramSerdeError::VersionMismatch { found, expected } => {
            assert_eq!(found, "rankspec.v0");
            assert_eq!(expected, IR_VERSION);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn loading_foreign_ir_version_from_disk_fails() {
    let mut program = specialized_program();
    program.ir_version = "rankspec.v0".to_string();
    let path = unique_path("foreign.bin");
    program.save_bincode(&path).expect("save bincode");

    let err = Program::load_bincode(&path).expect_err("version mismatch");
    let _ = fs::remove_file(path);
    assert!(
        matches!(
            err,
            ProgramIoError::Serialization(ProgramSerdeError::VersionMismatch { .. })
        ),
        "unexpected error: {err:?}"
    );
}
