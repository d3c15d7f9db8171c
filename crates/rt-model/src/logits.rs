use rt_tensor::kernels::{elementwise, matmul, norm, KernelLibrary};
use rt_tensor::{CommandRecorder, Result, Tensor};

use crate::weights::ModelWeights;

/// Final `rmsNorm` + projection to vocabulary logits, with optional
/// `finalLogitSoftcapping` folded in as `softcap * tanh(x / softcap)`.
pub fn compute_logits(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    weights: &ModelWeights,
    x: &Tensor,
    eps: f32,
    weight_offset: bool,
    final_logit_softcapping: Option<f32>,
) -> Result<Tensor> {
    let normed = final_norm(lib, rec, weights, x, eps, weight_offset)?;
    project(lib, rec, weights, &normed, final_logit_softcapping)
}

/// The model's final `rmsNorm`, applied but not yet projected to
/// vocabulary logits. Shared by `compute_logits` and by callers that want
/// a pooled hidden-state embedding instead of next-token logits.
pub fn final_norm(lib: &KernelLibrary, rec: &mut CommandRecorder, weights: &ModelWeights, x: &Tensor, eps: f32, weight_offset: bool) -> Result<Tensor> {
    let norm_w = weights.get(&weights.output_norm).expect("output norm weight not uploaded");
    norm::rms_norm_recorded(lib, rec, x, norm_w.buffer(), eps, weight_offset)
}

/// Projects an already-normed hidden state to vocabulary logits. Split out
/// of `compute_logits` so a caller that needs both the normed hidden state
/// (for an embedding) and the logits (for sampling) from the same decode
/// step can reuse one `rmsNorm` dispatch instead of running it twice.
pub fn project(lib: &KernelLibrary, rec: &mut CommandRecorder, weights: &ModelWeights, normed: &Tensor, final_logit_softcapping: Option<f32>) -> Result<Tensor> {
    let out_w = weights.get(&weights.output).expect("output projection weight not uploaded");
    let logits = matmul::matmul_recorded(lib, rec, normed, out_w)?;

    match final_logit_softcapping {
        Some(cap) => softcap_recorded(lib, rec, &logits, cap),
        None => Ok(logits),
    }
}

/// `cap * tanh(x / cap)`, expressed with the existing scale/elementwise
/// surface: the matmul kernel has no softcap of its own for the output
/// projection (unlike attention, which folds it in), so this is applied
/// as a follow-up pass reusing `scale` for the `1/cap` and `cap` factors
/// around a dedicated tanh dispatch.
fn softcap_recorded(lib: &KernelLibrary, rec: &mut CommandRecorder, x: &Tensor, cap: f32) -> Result<Tensor> {
    let scaled = elementwise::scale_recorded(lib, rec, x, 1.0 / cap)?;
    let tanh = tanh_dispatch(lib, rec, &scaled)?;
    elementwise::scale_recorded(lib, rec, &tanh, cap)
}

fn tanh_dispatch(lib: &KernelLibrary, rec: &mut CommandRecorder, x: &Tensor) -> Result<Tensor> {
    use bytemuck::{Pod, Zeroable};
    use rt_tensor::kernels::{bind_group, uniform_buffer, workgroups_1d};
    use rt_tensor::Shape;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct TanhParams {
        n: u32,
        _pad0: u32,
        _pad1: u32,
        _pad2: u32,
    }

    const TANH_SRC: &str = r#"
struct Params { n: u32, _pad0: u32, _pad1: u32, _pad2: u32 }
@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> out: array<f32>;
@group(0) @binding(2) var<uniform> p: Params;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= p.n) { return; }
    out[i] = tanh(x[i]);
}
"#;

    let n = x.shape().numel() as u32;
    let pipeline = lib.pipeline("tanh", TANH_SRC, "main");
    let params = TanhParams { n, _pad0: 0, _pad1: 0, _pad2: 0 };
    let ubuf = uniform_buffer(lib.context(), "tanh params", &params);

    let pooled = lib.pool().acquire(x.byte_len(), "tanh out")?;
    let out_arc = rec.track(pooled);

    let bg = bind_group(lib.context(), &pipeline, "tanh bind group", &[x.buffer(), &out_arc, &ubuf]);
    {
        let mut pass = rec.encoder_mut().begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("tanh"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(workgroups_1d(n, 64), 1, 1);
    }

    Ok(Tensor::from_recorded(lib.context().clone(), out_arc, Shape::new(x.shape().dims().to_vec()), x.dtype()))
}
