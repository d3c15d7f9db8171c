use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::kernels::common::{bind_group, uniform_buffer, workgroups_1d, KernelLibrary};
use crate::kernels::shaders::{LAYER_NORM, RMS_NORM};
use crate::recorder::CommandRecorder;
use crate::tensor::Tensor;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RmsParams {
    rows: u32,
    hidden: u32,
    eps: f32,
    weight_offset: u32,
}

/// RMSNorm over the last axis of `x`. `weight_offset` adds 1.0 to each
/// weight element before scaling, matching architectures (Gemma) whose
/// stored norm weights are zero-centered. `weight` is read as `array<f32>`;
/// norm weights are small enough that this build keeps them f32-resident
/// regardless of the model's matmul weight dtype.
pub fn rms_norm_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    x: &Tensor,
    weight: &wgpu::Buffer,
    eps: f32,
    weight_offset: bool,
) -> Result<Tensor> {
    let hidden = *x.shape().dims().last().expect("rms_norm requires rank >= 1") as u32;
    let rows = (x.shape().numel() as u32) / hidden;
    let pipeline = lib.pipeline("rms_norm", RMS_NORM, "main");
    let params = RmsParams { rows, hidden, eps, weight_offset: weight_offset as u32 };
    let ubuf = uniform_buffer(lib.context(), "rms_norm params", &params);

    let pooled = lib.pool().acquire(x.byte_len(), "rms_norm out")?;
    let out_arc = rec.track(pooled);

    let bg = bind_group(lib.context(), &pipeline, "rms_norm bind group", &[x.buffer(), weight, &out_arc, &ubuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("rms_norm"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(workgroups_1d(rows, 1), 1, 1);
    }

    Ok(Tensor::from_recorded(lib.context().clone(), out_arc, x.shape().clone(), x.dtype()))
}

pub fn rms_norm(lib: &KernelLibrary, x: &Tensor, weight: &wgpu::Buffer, eps: f32, weight_offset: bool) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = rms_norm_recorded(lib, &mut rec, x, weight, eps, weight_offset)?;
    pollster::block_on(rec.submit());
    Ok(out)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LayerNormParams {
    rows: u32,
    hidden: u32,
    eps: f32,
    _pad: u32,
}

pub fn layer_norm_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    x: &Tensor,
    weight: &wgpu::Buffer,
    bias: &wgpu::Buffer,
    eps: f32,
) -> Result<Tensor> {
    let hidden = *x.shape().dims().last().expect("layer_norm requires rank >= 1") as u32;
    let rows = (x.shape().numel() as u32) / hidden;
    let pipeline = lib.pipeline("layer_norm", LAYER_NORM, "main");
    let params = LayerNormParams { rows, hidden, eps, _pad: 0 };
    let ubuf = uniform_buffer(lib.context(), "layer_norm params", &params);

    let pooled = lib.pool().acquire(x.byte_len(), "layer_norm out")?;
    let out_arc = rec.track(pooled);

    let bg = bind_group(
        lib.context(),
        &pipeline,
        "layer_norm bind group",
        &[x.buffer(), weight, bias, &out_arc, &ubuf],
    );
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("layer_norm"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(workgroups_1d(rows, 1), 1, 1);
    }

    Ok(Tensor::from_recorded(lib.context().clone(), out_arc, x.shape().clone(), x.dtype()))
}

pub fn layer_norm(lib: &KernelLibrary, x: &Tensor, weight: &wgpu::Buffer, bias: &wgpu::Buffer, eps: f32) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = layer_norm_recorded(lib, &mut rec, x, weight, bias, eps)?;
    pollster::block_on(rec.submit());
    Ok(out)
}
