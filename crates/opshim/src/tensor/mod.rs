//! Core tensor abstractions shared by operators and kernels.
//!
//! A [`Tensor`] is a handle onto shared host storage. Operators hold handles to the
//! blobs of a workspace and pass them to kernels, which write results through the
//! same handles in place.

pub mod dtype;
mod host_tensor;
pub mod shape;

pub use dtype::DType;
pub use host_tensor::{Tensor, TensorData};
pub use shape::Shape;
