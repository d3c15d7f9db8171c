use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::kernels::common::{bind_group, uniform_buffer, workgroups_1d, KernelLibrary};
use crate::kernels::shaders::{ACTIVATION, SILU_ROW_SPLIT};
use crate::recorder::CommandRecorder;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::DType;

const KIND_SILU: u32 = 0;
const KIND_GELU: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ActivationParams {
    n: u32,
    kind: u32,
    swiglu_limit: f32,
    has_limit: u32,
}

fn activation_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    x: &Tensor,
    kind: u32,
    limit: Option<f32>,
) -> Result<Tensor> {
    let n = x.shape().numel() as u32;
    let pipeline = lib.pipeline("activation", ACTIVATION, "main");
    let params = ActivationParams {
        n,
        kind,
        swiglu_limit: limit.unwrap_or(0.0),
        has_limit: limit.is_some() as u32,
    };
    let ubuf = uniform_buffer(lib.context(), "activation params", &params);

    let pooled = lib.pool().acquire(x.byte_len(), "activation out")?;
    let out_arc = rec.track(pooled);

    let bg = bind_group(lib.context(), &pipeline, "activation bind group", &[x.buffer(), &out_arc, &ubuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("activation"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(workgroups_1d(n, 64), 1, 1);
    }

    Ok(Tensor::from_recorded(lib.context().clone(), out_arc, x.shape().clone(), x.dtype()))
}

pub fn silu_recorded(lib: &KernelLibrary, rec: &mut CommandRecorder, x: &Tensor) -> Result<Tensor> {
    activation_recorded(lib, rec, x, KIND_SILU, None)
}

pub fn silu(lib: &KernelLibrary, x: &Tensor) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = silu_recorded(lib, &mut rec, x)?;
    pollster::block_on(rec.submit());
    Ok(out)
}

pub fn gelu_recorded(lib: &KernelLibrary, rec: &mut CommandRecorder, x: &Tensor) -> Result<Tensor> {
    activation_recorded(lib, rec, x, KIND_GELU, None)
}

pub fn gelu(lib: &KernelLibrary, x: &Tensor) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = gelu_recorded(lib, &mut rec, x)?;
    pollster::block_on(rec.submit());
    Ok(out)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SplitParams {
    rows: u32,
    dim: u32,
    kind: u32,
    has_limit: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SplitLimit {
    swiglu_limit: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
}

/// Fused SwiGLU/GeGLU: `x` is `[rows, 2*dim]` holding `[gate | up]`,
/// output is `[rows, dim] = act(clamp(gate)) * up`. Used whenever the MLP
/// gate and up projections were fused into a single matmul upstream.
pub fn silu_row_split_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    x: &Tensor,
    dim: u32,
    gelu_variant: bool,
    swiglu_limit: Option<f32>,
) -> Result<Tensor> {
    let rows = (x.shape().numel() as u32) / (2 * dim);
    let pipeline = lib.pipeline("silu_row_split", SILU_ROW_SPLIT, "main");
    let kind = if gelu_variant { KIND_GELU } else { KIND_SILU };
    let params = SplitParams { rows, dim, kind, has_limit: swiglu_limit.is_some() as u32 };
    let limit = SplitLimit { swiglu_limit: swiglu_limit.unwrap_or(0.0), _pad0: 0.0, _pad1: 0.0, _pad2: 0.0 };
    let pbuf = uniform_buffer(lib.context(), "silu_row_split params", &params);
    let lbuf = uniform_buffer(lib.context(), "silu_row_split limit", &limit);

    let out_bytes = (rows as u64) * (dim as u64) * 4;
    let pooled = lib.pool().acquire(out_bytes, "silu_row_split out")?;
    let out_arc = rec.track(pooled);

    let bg = bind_group(lib.context(), &pipeline, "silu_row_split bind group", &[x.buffer(), &out_arc, &pbuf, &lbuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("silu_row_split"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(workgroups_1d(rows * dim, 64), 1, 1);
    }

    Ok(Tensor::from_recorded(lib.context().clone(), out_arc, Shape::new(vec![rows as usize, dim as usize]), DType::F32))
}

pub fn silu_row_split(lib: &KernelLibrary, x: &Tensor, dim: u32, gelu_variant: bool, swiglu_limit: Option<f32>) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = silu_row_split_recorded(lib, &mut rec, x, dim, gelu_variant, swiglu_limit)?;
    pollster::block_on(rec.submit());
    Ok(out)
}
