use bytemuck::{Pod, Zeroable};

use crate::error::{Result, TensorError};
use crate::kernels::common::{bind_group, uniform_buffer, KernelLibrary};
use crate::kernels::shaders::{MATMUL_F16, MATMUL_F32};
use crate::recorder::CommandRecorder;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::weight::{WeightEntry, WeightLayout};
use crate::DType;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MatmulParams {
    m: u32,
    k: u32,
    n: u32,
    transpose_b: u32,
}

/// `x @ weight`, dispatched on the weight's dtype. Dense f32 and f16
/// weights both run against WGSL (f16 unpacked per element with
/// `unpack2x16float`, activations and output staying f32). Brain-float and
/// k-quant weights have no dequantizing shader variant yet and route
/// through `TensorError::UnsupportedDType`, an explicit scope cut rather
/// than a generic catch-all — see `DESIGN.md`.
pub fn matmul_recorded(
    lib: &KernelLibrary,
    rec: &mut CommandRecorder,
    x: &Tensor,
    weight: &WeightEntry,
) -> Result<Tensor> {
    let (label, source) = match weight.dtype() {
        DType::F32 => ("matmul_f32", MATMUL_F32),
        DType::F16 => ("matmul_f16", MATMUL_F16),
        DType::Bf16 | DType::Q4K => return Err(TensorError::UnsupportedDType(weight.dtype().to_string())),
    };
    let k = *x.shape().dims().last().expect("matmul requires rank >= 1") as u32;
    let m = (x.shape().numel() as u32) / k;
    let (out_dim, transpose_b) = match weight.layout() {
        WeightLayout::Row => (weight.shape().dim(0) as u32, true),
        WeightLayout::Column => (weight.shape().dim(1) as u32, false),
    };
    let n = out_dim;

    let pipeline = lib.pipeline(label, source, "main");
    let params = MatmulParams { m, k, n, transpose_b: transpose_b as u32 };
    let ubuf = uniform_buffer(lib.context(), "matmul params", &params);

    let out_bytes = (m as u64) * (n as u64) * 4;
    let pooled = lib.pool().acquire(out_bytes, "matmul out")?;
    let out_arc = rec.track(pooled);

    let bg = bind_group(lib.context(), &pipeline, "matmul bind group", &[x.buffer(), weight.buffer(), &out_arc, &ubuf]);
    {
        let mut pass = rec
            .encoder_mut()
            .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("matmul"), timestamp_writes: None });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(n.div_ceil(8), m.div_ceil(8), 1);
    }

    let mut out_dims = x.shape().dims()[..x.shape().ndim() - 1].to_vec();
    out_dims.push(n as usize);
    Ok(Tensor::from_recorded(lib.context().clone(), out_arc, Shape::new(out_dims), DType::F32))
}

pub fn matmul(lib: &KernelLibrary, x: &Tensor, weight: &WeightEntry) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = matmul_recorded(lib, &mut rec, x, weight)?;
    pollster::block_on(rec.submit());
    Ok(out)
}
