use std::sync::Arc;

use rt_tensor::{CommandRecorder, DType, GpuContext, Result, Tensor, TensorError};
use wgpu::util::DeviceExt;

use super::{AttentionInputs, KvCache};

/// Dense `⟨maxSeqLen, numKVHeads, headDim⟩` storage per layer. Simplest
/// layout; requires the whole per-layer buffer to fit in one storage
/// binding.
pub struct ContiguousKvCache {
    k: Vec<Arc<wgpu::Buffer>>,
    v: Vec<Arc<wgpu::Buffer>>,
    kv_dim: usize,
    dtype_bytes: u64,
    max_seq_len: usize,
    seq_len: usize,
    pending: usize,
}

impl ContiguousKvCache {
    pub fn new(context: &GpuContext, num_layers: usize, kv_dim: usize, max_seq_len: usize, dtype: DType) -> Result<Self> {
        let dtype_bytes = dtype.size_in_bytes() as u64;
        let bytes = kv_dim as u64 * max_seq_len as u64 * dtype_bytes;
        let limit = context.max_storage_buffer_binding_size();
        if bytes > limit {
            return Err(TensorError::BufferTooLarge { requested: bytes, limit });
        }
        let zero = vec![0u8; bytes as usize];
        let make = |label: &str| {
            Arc::new(context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &zero,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            }))
        };
        let k = (0..num_layers).map(|i| make(&format!("kv cache k[{i}]"))).collect();
        let v = (0..num_layers).map(|i| make(&format!("kv cache v[{i}]"))).collect();
        Ok(Self { k, v, kv_dim, dtype_bytes, max_seq_len, seq_len: 0, pending: 0 })
    }
}

impl KvCache for ContiguousKvCache {
    fn append(&mut self, _context: &GpuContext, rec: &mut CommandRecorder, layer: usize, k: &Tensor, v: &Tensor, tokens: &[u32]) -> Result<()> {
        let n_tokens = tokens.len();
        let offset = self.seq_len as u64 * self.kv_dim as u64 * self.dtype_bytes;
        let len = n_tokens as u64 * self.kv_dim as u64 * self.dtype_bytes;
        rec.encoder_mut().copy_buffer_to_buffer(k.buffer(), 0, &self.k[layer], offset, len);
        rec.encoder_mut().copy_buffer_to_buffer(v.buffer(), 0, &self.v[layer], offset, len);
        self.pending = n_tokens;
        Ok(())
    }

    fn attention_inputs(&self, _context: &GpuContext, _rec: &mut CommandRecorder, layer: usize) -> Result<AttentionInputs> {
        Ok(AttentionInputs {
            k: self.k[layer].clone(),
            v: self.v[layer].clone(),
            kv_len: (self.seq_len + self.pending) as u32,
            base_offset: 0,
        })
    }

    fn window_len(&self, _layer: usize) -> usize {
        self.max_seq_len
    }

    fn commit(&mut self, n_tokens: usize) {
        self.seq_len += n_tokens;
        self.pending = 0;
    }

    fn seq_len(&self) -> usize {
        self.seq_len
    }

    fn rewind(&mut self, seq_len: usize) {
        self.seq_len = seq_len;
        self.pending = 0;
    }

    fn reset(&mut self) {
        self.seq_len = 0;
        self.pending = 0;
    }
}
