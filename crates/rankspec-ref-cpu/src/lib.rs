//! Reference interpreter for rankspec programs.
//!
//! Executes every operation of the portable IR on host memory, including `cond`
//! regions, tuple-valued shape ops and runtime assertions. Rewritten programs are
//! checked against it in the rankspec test suite.

pub mod cpu;

pub use cpu::{CpuPortableBackend, CpuTensor, TensorData};
