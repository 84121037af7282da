pub mod conversion;
mod env;
pub mod ir;
pub mod shape;
pub mod transforms;

pub use ir::spec::{Function, PortableBackend, Program, TensorSpec};
pub use transforms::{FunctionPass, PassResult, TransformUnrankedPass};
