use rt_tensor::kernels::KernelLibrary;
use rt_tensor::{DType, Result, Shape, Tensor};

/// Uploads host token ids as a GPU-resident index tensor. The tensor's
/// dtype is labeled `F32` purely for `Tensor`'s own byte-length bookkeeping
/// — every kernel that binds an indices/token buffer (`gather`, `argmax`,
/// `gpuSample`, `checkStop`) declares it `array<u32>` in WGSL and reads the
/// raw bit pattern, ignoring the Rust-side dtype label.
pub fn upload_token_ids(lib: &KernelLibrary, ids: &[u32]) -> Result<Tensor> {
    let t = Tensor::zeros(lib.context(), lib.pool(), Shape::new(vec![ids.len().max(1)]), DType::F32, "token ids")?;
    lib.context().queue.write_buffer(t.buffer(), 0, bytemuck::cast_slice(ids));
    Ok(t)
}
