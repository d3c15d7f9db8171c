use bytemuck::{Pod, Zeroable};

use crate::buffer_pool::BufferPool;
use crate::context::GpuContext;
use crate::error::Result;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::DType;

/// GPU-side status struct written by kernels when an activation exceeds
/// the configured magnitude or becomes non-finite. `triggered` is set
/// atomically by whichever invocation first crosses the threshold; the
/// pass always completes so later passes in the same submission never
/// read an uninitialized buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FinitenessStatus {
    pub triggered: u32,
    pub layer: u32,
    pub step: u32,
    pub reserved: u32,
}

impl FinitenessStatus {
    pub fn clear() -> Self {
        Self {
            triggered: 0,
            layer: 0,
            step: 0,
            reserved: 0,
        }
    }
}

/// Policy controlling whether, and how aggressively, kernels check for
/// finiteness excursions.
#[derive(Debug, Clone, Copy)]
pub struct FinitenessPolicy {
    pub enabled: bool,
    pub include_non_finite: bool,
    pub abs_threshold: f32,
}

impl Default for FinitenessPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            include_non_finite: true,
            abs_threshold: 65500.0,
        }
    }
}

/// Binds a finiteness guard buffer to the dispatch that might trip it:
/// which policy to check against, and which layer/step to stamp into
/// `FinitenessStatus` if it does. Built fresh per dispatch from the
/// driver's current execution plan, since the active plan (and so its
/// policy) can change mid-session once a fallback transition fires.
#[derive(Clone, Copy)]
pub struct FinitenessGuard<'a> {
    pub buffer: &'a FinitenessBuffer,
    pub policy: FinitenessPolicy,
    pub layer: u32,
    pub step: u32,
}

/// The finiteness guard's GPU buffer, held by the layer engine and handed
/// to any kernel whose output activation is f16 under an enabled policy.
pub struct FinitenessBuffer {
    tensor: Tensor,
}

impl FinitenessBuffer {
    pub fn new(context: &GpuContext, pool: &BufferPool) -> Result<Self> {
        let tensor = Tensor::zeros(
            context,
            pool,
            Shape::new(vec![4]),
            DType::F32, // 4 x u32, reinterpreted at read time; shape tracks element count not byte layout
            "finiteness status",
        )?;
        Ok(Self { tensor })
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        self.tensor.buffer()
    }

    /// Read the current status back to the host. Call only once the
    /// submission that may have written it has completed.
    pub fn read(&self) -> Result<FinitenessStatus> {
        let raw: Vec<u32> = self.tensor.read_to_vec()?;
        Ok(FinitenessStatus {
            triggered: raw[0],
            layer: raw[1],
            step: raw[2],
            reserved: raw[3],
        })
    }

    pub async fn read_async(&self) -> Result<FinitenessStatus> {
        let raw: Vec<u32> = self.tensor.read_async().await?;
        Ok(FinitenessStatus {
            triggered: raw[0],
            layer: raw[1],
            step: raw[2],
            reserved: raw[3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_status() {
        let s = FinitenessStatus::clear();
        assert_eq!(s.triggered, 0);
    }

    #[test]
    fn test_default_policy() {
        let p = FinitenessPolicy::default();
        assert!(p.enabled);
        assert!((p.abs_threshold - 65500.0).abs() < 1.0);
    }
}
