//! Tensor IR with ranked and unranked types, nested regions, and rewrite infrastructure.

pub mod builder;
pub mod index;
pub mod pattern;
pub mod rewriter;
pub mod spec;
pub mod utils;
