use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::kernels::common::{bind_group, uniform_buffer, KernelLibrary};
use crate::kernels::shaders::ROPE;
use crate::recorder::CommandRecorder;
use crate::tensor::Tensor;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RopeParams {
    num_heads: u32,
    head_dim: u32,
    n_tokens: u32,
    base_pos: u32,
}

/// Rotary position embedding applied in place over `x`'s last two axes
/// `[n_tokens, num_heads, head_dim]`, against precomputed per-position
/// cos/sin tables (`cos_table`/`sin_table`, each `[max_pos, head_dim/2]`)
/// that the layer engine builds once at load time for the global and
/// local (sliding-window) frequency bases, with YARN scaling already
/// folded in where configured.
pub fn rope_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    x: &Tensor,
    cos_table: &wgpu::Buffer,
    sin_table: &wgpu::Buffer,
    num_heads: u32,
    head_dim: u32,
    base_pos: u32,
) -> Result<Tensor> {
    let n_tokens = (x.shape().numel() as u32) / (num_heads * head_dim);
    let pipeline = lib.pipeline("rope", ROPE, "main");
    let params = RopeParams { num_heads, head_dim, n_tokens, base_pos };
    let ubuf = uniform_buffer(lib.context(), "rope params", &params);

    // RoPE mutates in place; the recorder still needs a tracked handle so
    // the buffer's lifetime is tied to this submission like every other
    // kernel output, even though the input and output alias.
    let bg = bind_group(lib.context(), &pipeline, "rope bind group", &[x.buffer(), cos_table, sin_table, &ubuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("rope"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(n_tokens, num_heads, 1);
    }

    Ok(Tensor::from_recorded(lib.context().clone(), x.arc_buffer(), x.shape().clone(), x.dtype()))
}

pub fn rope(
    lib: &KernelLibrary,
    x: &Tensor,
    cos_table: &wgpu::Buffer,
    sin_table: &wgpu::Buffer,
    num_heads: u32,
    head_dim: u32,
    base_pos: u32,
) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = rope_recorded(lib, &mut rec, x, cos_table, sin_table, num_heads, head_dim, base_pos)?;
    pollster::block_on(rec.submit());
    Ok(out)
}
