//! GPU compute kernels: each module exposes an immediate surface (blocks
//! on its own one-pass submission) and a `_recorded` surface (appends to a
//! caller-owned `CommandRecorder`, for fusing a whole decode step into one
//! submission).

pub mod activation;
pub mod attention;
pub mod cast;
mod common;
pub mod elementwise;
pub mod gather;
pub mod matmul;
pub mod norm;
pub mod rope;
pub mod sampling;
mod shaders;

pub use common::{bind_group, uniform_buffer, workgroups_1d, KernelLibrary};
