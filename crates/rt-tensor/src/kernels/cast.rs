use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::finiteness::FinitenessGuard;
use crate::kernels::common::{bind_group, uniform_buffer, workgroups_1d, KernelLibrary};
use crate::kernels::shaders::{CAST_F32_TO_F16, CAST_F32_TO_F16_CHECKED};
use crate::recorder::CommandRecorder;
use crate::tensor::Tensor;
use crate::DType;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CastParams {
    n: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CheckedCastParams {
    n: u32,
    layer: u32,
    step: u32,
    threshold_bits: u32,
    include_non_finite: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

/// Narrows an f32 activation down to packed f16, used at KV-cache write
/// time and wherever a layer's storage dtype calls for half precision.
/// When `finiteness` is `Some`, every narrowed element is checked against
/// its policy and a trip stamps `finiteness.buffer` with `layer`/`step`;
/// callers that pass `None` skip the check entirely (narrowing a value
/// already known to be in range, or running with the guard disabled).
pub fn cast_f32_to_f16_recorded(lib: &KernelLibrary, rec: &mut CommandRecorder, x: &Tensor, finiteness: Option<FinitenessGuard>) -> Result<Tensor> {
    let n = x.shape().numel() as u32;
    let out_bytes = ((n as u64) * 2).div_ceil(4) * 4;
    let pooled = lib.pool().acquire(out_bytes.max(4), "cast f16 out")?;
    let out_arc = rec.track(pooled);

    match finiteness {
        None => {
            let pipeline = lib.pipeline("cast_f32_to_f16", CAST_F32_TO_F16, "main");
            let params = CastParams { n, _pad0: 0, _pad1: 0, _pad2: 0 };
            let ubuf = uniform_buffer(lib.context(), "cast params", &params);
            let bg = bind_group(lib.context(), &pipeline, "cast bind group", &[x.buffer(), &out_arc, &ubuf]);
            let mut pass = rec
                .encoder_mut()
                .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("cast_f32_to_f16"), timestamp_writes: None });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(workgroups_1d(n.div_ceil(2), 64), 1, 1);
        }
        Some(guard) => {
            let pipeline = lib.pipeline("cast_f32_to_f16_checked", CAST_F32_TO_F16_CHECKED, "main");
            let params = CheckedCastParams {
                n,
                layer: guard.layer,
                step: guard.step,
                threshold_bits: guard.policy.abs_threshold.to_bits(),
                include_non_finite: guard.policy.include_non_finite as u32,
                _pad0: 0,
                _pad1: 0,
                _pad2: 0,
            };
            let ubuf = uniform_buffer(lib.context(), "cast checked params", &params);
            let bg = bind_group(
                lib.context(),
                &pipeline,
                "cast checked bind group",
                &[x.buffer(), &out_arc, &ubuf, guard.buffer.buffer()],
            );
            let mut pass = rec
                .encoder_mut()
                .begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("cast_f32_to_f16_checked"), timestamp_writes: None });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(workgroups_1d(n.div_ceil(2), 64), 1, 1);
        }
    }

    Ok(Tensor::from_recorded(lib.context().clone(), out_arc, x.shape().clone(), DType::F16))
}

pub fn cast_f32_to_f16(lib: &KernelLibrary, x: &Tensor, finiteness: Option<FinitenessGuard>) -> Result<Tensor> {
    let mut rec = lib.recorder();
    let out = cast_f32_to_f16_recorded(lib, &mut rec, x, finiteness)?;
    pollster::block_on(rec.submit());
    Ok(out)
}
