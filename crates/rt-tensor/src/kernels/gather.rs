use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::kernels::common::{bind_group, uniform_buffer, workgroups_1d, KernelLibrary};
use crate::kernels::shaders::GATHER;
use crate::recorder::CommandRecorder;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::DType;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GatherParams {
    rows: u32,
    cols: u32,
    vocab: u32,
    transpose: u32,
}

/// Row lookup into an embedding table: `indices[i]` selects a row of
/// `table` (or a column, if `transpose` is set, for tied-weight output
/// projections stored the same way as the input embedding). `table` is
/// read as `array<f32>`; only f32-resident embedding tables are supported,
/// unlike `matmul_recorded`'s weight argument.
pub fn gather_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    indices: &Tensor,
    table: &wgpu::Buffer,
    cols: u32,
    vocab: u32,
    transpose: bool,
) -> Result<Tensor> {
    let rows = indices.shape().numel() as u32;
    let pipeline = lib.pipeline("gather", GATHER, "main");
    let params = GatherParams {
        rows,
        cols,
        vocab,
        transpose: transpose as u32,
    };
    let ubuf = uniform_buffer(lib.context(), "gather params", &params);

    let out_bytes = (rows as u64) * (cols as u64) * 4;
    let pooled = lib.pool().acquire(out_bytes, "gather out")?;
    let out_arc = rec.track(pooled);

    let bg = bind_group(
        lib.context(),
        &pipeline,
        "gather bind group",
        &[indices.buffer(), table, &out_arc, &ubuf],
    );
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("gather"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(workgroups_1d(rows * cols, 64), 1, 1);
    }

    Ok(Tensor::from_recorded(
        lib.context().clone(),
        out_arc,
        Shape::new(vec![rows as usize, cols as usize]),
        DType::F32,
    ))
}

pub fn gather(
    lib: &KernelLibrary,
    indices: &Tensor,
    table: &wgpu::Buffer,
    cols: u32,
    vocab: u32,
    transpose: bool,
) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = gather_recorded(lib, &mut rec, indices, table, cols, vocab, transpose)?;
    pollster::block_on(rec.submit());
    Ok(out)
}
