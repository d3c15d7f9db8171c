use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::kernels::common::{bind_group, uniform_buffer, KernelLibrary};
use crate::kernels::shaders::{ARGMAX, CHECK_STOP, GPU_SAMPLE};
use crate::recorder::CommandRecorder;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::DType;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ArgmaxParams {
    vocab: u32,
    pad_token: u32,
    has_softcap: u32,
    softcap: f32,
    out_idx: u32,
    _pad: u32,
}

/// GPU-resident argmax over a single row of logits, writing the winning
/// token id into slot `out_idx` of a shared `u32` output tensor so a whole
/// batch's greedy picks land in one buffer without a host round trip.
#[allow(clippy::too_many_arguments)]
pub fn argmax_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    logits: &Tensor,
    out: &Tensor,
    out_idx: u32,
    pad_token: u32,
    softcap: Option<f32>,
) -> Result<()> {
    let vocab = logits.shape().numel() as u32;
    let pipeline = lib.pipeline("argmax", ARGMAX, "main");
    let params = ArgmaxParams {
        vocab,
        pad_token,
        has_softcap: softcap.is_some() as u32,
        softcap: softcap.unwrap_or(0.0),
        out_idx,
        _pad: 0,
    };
    let ubuf = uniform_buffer(lib.context(), "argmax params", &params);

    let bg = bind_group(lib.context(), &pipeline, "argmax bind group", &[logits.buffer(), out.buffer(), &ubuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("argmax"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }
    Ok(())
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GpuSampleParams {
    vocab: u32,
    pad_token: u32,
    has_softcap: u32,
    softcap: f32,
    top_k: u32,
    temperature: f32,
    seed: u32,
    out_idx: u32,
}

/// GPU-resident temperature/top-k sample (no top-p: the device path keeps
/// only the `topK` window and draws directly from its softmax), writing
/// into slot `out_idx` of a shared token-id tensor the same way `argmax`
/// does. `top_k` is capped at 128 candidates by the shader.
#[allow(clippy::too_many_arguments)]
pub fn gpu_sample_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    logits: &Tensor,
    out: &Tensor,
    out_idx: u32,
    pad_token: u32,
    top_k: u32,
    temperature: f32,
    seed: u32,
    softcap: Option<f32>,
) -> Result<()> {
    let vocab = logits.shape().numel() as u32;
    let pipeline = lib.pipeline("gpu_sample", GPU_SAMPLE, "main");
    let params = GpuSampleParams {
        vocab,
        pad_token,
        has_softcap: softcap.is_some() as u32,
        softcap: softcap.unwrap_or(0.0),
        top_k,
        temperature: temperature.max(1e-7),
        seed,
        out_idx,
    };
    let ubuf = uniform_buffer(lib.context(), "gpu_sample params", &params);

    let bg = bind_group(lib.context(), &pipeline, "gpu_sample bind group", &[logits.buffer(), out.buffer(), &ubuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("gpu_sample"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }
    Ok(())
}

/// Allocate a `u32` tensor sized for `slots` batch entries, to receive
/// argmax/gpuSample outputs before a single batched readback.
pub fn alloc_token_slots(lib: &KernelLibrary, slots: u32) -> Result<Tensor> {
    Tensor::zeros(lib.context(), lib.pool(), Shape::new(vec![slots as usize]), DType::F32, "token slots")
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CheckStopParams {
    idx: u32,
    eos: u32,
    max_tokens: u32,
    pos: u32,
}

/// Writes `1` into `stop_buf[idx]` once the sampled token matches `eos` or
/// `pos` has reached `max_tokens`, letting the driver batch every ring
/// slot's stop decision into one readback per decode step.
pub fn check_stop_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    tokens: &Tensor,
    stop: &Tensor,
    idx: u32,
    eos: u32,
    pos: u32,
    max_tokens: u32,
) -> Result<()> {
    let pipeline = lib.pipeline("check_stop", CHECK_STOP, "main");
    let params = CheckStopParams { idx, eos, max_tokens, pos };
    let ubuf = uniform_buffer(lib.context(), "check_stop params", &params);

    let bg = bind_group(lib.context(), &pipeline, "check_stop bind group", &[tokens.buffer(), stop.buffer(), &ubuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("check_stop"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }
    Ok(())
}
