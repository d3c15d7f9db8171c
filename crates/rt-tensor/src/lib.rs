//! `rt-tensor` - GPU-resident tensor, buffer pool, and compute kernel
//! library for the inference core.
//!
//! This crate provides:
//! - A `GpuContext` wrapping the device/queue/adapter triple opened once
//!   at model load
//! - A `Tensor` type backed by pool-acquired or recorder-owned GPU buffers
//! - A `BufferPool` for recycling activation buffers by size class
//! - A `WeightRegistry` for immutable, pool-exempt model weights
//! - A `CommandRecorder` for batching a decode step's passes into one
//!   command buffer submission
//! - A `FinitenessBuffer`/`FinitenessPolicy` pair for the narrow-float
//!   activation guard
//! - A `kernels` module of GPU compute passes (gather, norm, matmul,
//!   elementwise, activation, attention, rope, sampling, cast)

pub mod buffer_pool;
pub mod context;
pub mod dtype;
pub mod error;
pub mod finiteness;
pub mod kernels;
pub mod recorder;
pub mod shape;
pub mod tensor;
pub mod weight;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use context::GpuContext;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use finiteness::{FinitenessBuffer, FinitenessGuard, FinitenessPolicy, FinitenessStatus};
pub use recorder::CommandRecorder;
pub use shape::Shape;
pub use tensor::Tensor;
pub use weight::{QuantMeta, WeightEntry, WeightLayout, WeightRegistry};
