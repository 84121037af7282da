//! Runtime shape computation: host algorithms and their IR emitters.

pub mod extents;
pub mod oracle;

pub use extents::{
    broadcast_shapes, broadcast_to_rank, is_scalar_like, minimum_broadcast_shapes, num_elements,
    ShapeError,
};
