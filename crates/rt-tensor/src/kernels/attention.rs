use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::kernels::common::{bind_group, uniform_buffer, KernelLibrary};
use crate::kernels::shaders::ATTENTION;
use crate::recorder::CommandRecorder;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::DType;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AttentionParams {
    num_heads: u32,
    num_kv_heads: u32,
    head_dim: u32,
    seq_len: u32,
    kv_len: u32,
    base_offset: u32,
    softcap: f32,
    has_softcap: u32,
}

/// Grouped-query causal attention over a contiguous KV range.
///
/// `q` is `[seq_len, num_heads, head_dim]`, `k`/`v` are
/// `[kv_len, num_kv_heads, head_dim]` already materialized for this
/// window (paging/sliding/tiered cache layouts resolve their physical
/// addressing before calling this kernel). `base_offset` is the absolute
/// position of `q`'s first row, so causal masking for prefill and
/// single-token decode share one dispatch shape. `q`/`k`/`v`/`out` are all
/// read and written as `array<f32>`, like every other activation kernel in
/// this library; only weight matrices (via `matmul_recorded`) have a
/// dedicated f16 path today.
#[allow(clippy::too_many_arguments)]
pub fn attention_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    q: &Tensor,
    k: &wgpu::Buffer,
    v: &wgpu::Buffer,
    num_heads: u32,
    num_kv_heads: u32,
    head_dim: u32,
    kv_len: u32,
    base_offset: u32,
    softcap: Option<f32>,
) -> Result<Tensor> {
    let seq_len = (q.shape().numel() as u32) / (num_heads * head_dim);
    let pipeline = lib.pipeline("attention", ATTENTION, "main");
    let params = AttentionParams {
        num_heads,
        num_kv_heads,
        head_dim,
        seq_len,
        kv_len,
        base_offset,
        softcap: softcap.unwrap_or(0.0),
        has_softcap: softcap.is_some() as u32,
    };
    let ubuf = uniform_buffer(lib.context(), "attention params", &params);

    let pooled = lib.pool().acquire(q.byte_len(), "attention out")?;
    let out_arc = rec.track(pooled);

    let bg = bind_group(lib.context(), &pipeline, "attention bind group", &[q.buffer(), k, v, &out_arc, &ubuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("attention"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(seq_len, num_heads, 1);
    }

    Ok(Tensor::from_recorded(lib.context().clone(), out_arc, Shape::new(vec![seq_len as usize, num_heads as usize, head_dim as usize]), DType::F32))
}

#[allow(clippy::too_many_arguments)]
pub fn attention(
    lib: &KernelLibrary,
    q: &Tensor,
    k: &wgpu::Buffer,
    v: &wgpu::Buffer,
    num_heads: u32,
    num_kv_heads: u32,
    head_dim: u32,
    kv_len: u32,
    base_offset: u32,
    softcap: Option<f32>,
) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = attention_recorded(lib, &mut rec, q, k, v, num_heads, num_kv_heads, head_dim, kv_len, base_offset, softcap)?;
    pollster::block_on(rec.submit());
    Ok(out)
}
