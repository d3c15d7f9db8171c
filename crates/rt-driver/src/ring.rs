use rt_tensor::kernels::sampling::alloc_token_slots;
use rt_tensor::kernels::KernelLibrary;
use rt_tensor::{DType, Result, Shape, Tensor};

/// Pre-allocated buffers for a batched decode step: `tokens[0]` is seeded
/// with the last token produced before the batch, the recorder fills
/// `tokens[1..=capacity]` as the batch runs, and `tokens[i]` is both the
/// output of step `i-1` and the input to step `i`. `stop_flags` is only
/// written in per-token stop-check mode.
pub struct DecodeRing {
    pub tokens: Tensor,
    pub stop_flags: Tensor,
    pub capacity: usize,
}

impl DecodeRing {
    pub fn new(lib: &KernelLibrary, capacity: usize) -> Result<Self> {
        Ok(Self {
            tokens: alloc_token_slots(lib, (capacity + 1) as u32)?,
            stop_flags: alloc_token_slots(lib, capacity.max(1) as u32)?,
            capacity,
        })
    }

    /// Writes `last_token` into slot 0 before the batch's recorder runs.
    pub fn seed(&self, lib: &KernelLibrary, last_token: u32) {
        lib.context().queue.write_buffer(self.tokens.buffer(), 0, bytemuck::bytes_of(&last_token));
    }

    /// A one-element view of ring slot `idx`'s token, as a fresh buffer a
    /// kernel can bind as its own input tensor: the shared kernel library
    /// has no strided/offset binding primitive, so each step's embed input
    /// is materialized by a tiny GPU-to-GPU copy out of the ring instead of
    /// bound directly against an offset into `tokens`.
    pub fn input_at(&self, lib: &KernelLibrary, rec: &mut rt_tensor::CommandRecorder, idx: usize) -> Tensor {
        let bytes = 4u64;
        let context = lib.context().clone();
        let out = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("decode ring step input"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        rec.encoder_mut().copy_buffer_to_buffer(self.tokens.buffer(), idx as u64 * bytes, &out, 0, bytes);
        Tensor::from_recorded(context, std::sync::Arc::new(out), Shape::new(vec![1]), DType::F32)
    }

    /// Reads the whole ring back to the host after the batch's recorder
    /// has been submitted. `tokens()[1..]` are the `capacity` sampled
    /// token ids in order; `tokens()[0]` is the seed.
    pub fn read_tokens(&self) -> Result<Vec<u32>> {
        self.tokens.read_to_vec()
    }

    pub fn read_stop_flags(&self) -> Result<Vec<u32>> {
        self.stop_flags.read_to_vec()
    }
}
