use std::sync::Arc;

use rt_tensor::{CommandRecorder, DType, GpuContext, Result, Tensor};
use wgpu::util::DeviceExt;

use super::{AttentionInputs, KvCache};

/// Contiguous storage sized to `windowSize`; writes wrap around so only
/// the most recent `windowSize` positions are ever resident. Readers
/// (the attention kernel) are given `base_offset` so causal masking still
/// lines up with absolute position.
pub struct SlidingKvCache {
    k: Vec<Arc<wgpu::Buffer>>,
    v: Vec<Arc<wgpu::Buffer>>,
    kv_dim: usize,
    dtype_bytes: u64,
    window_size: usize,
    seq_len: usize,
    pending: usize,
}

impl SlidingKvCache {
    pub fn new(context: &GpuContext, num_layers: usize, kv_dim: usize, window_size: usize, dtype: DType) -> Result<Self> {
        let dtype_bytes = dtype.size_in_bytes() as u64;
        let bytes = kv_dim as u64 * window_size as u64 * dtype_bytes;
        let zero = vec![0u8; bytes as usize];
        let make = |label: &str| {
            Arc::new(context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &zero,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            }))
        };
        let k = (0..num_layers).map(|i| make(&format!("sliding kv k[{i}]"))).collect();
        let v = (0..num_layers).map(|i| make(&format!("sliding kv v[{i}]"))).collect();
        Ok(Self { k, v, kv_dim, dtype_bytes, window_size, seq_len: 0, pending: 0 })
    }

    fn write_wrapped(&self, rec: &mut CommandRecorder, src: &wgpu::Buffer, dst: &wgpu::Buffer, n_tokens: usize) {
        let row = self.kv_dim as u64 * self.dtype_bytes;
        let start = self.seq_len % self.window_size;
        let first_run = (self.window_size - start).min(n_tokens);
        rec.encoder_mut().copy_buffer_to_buffer(src, 0, dst, start as u64 * row, first_run as u64 * row);
        let remaining = n_tokens - first_run;
        if remaining > 0 {
            rec.encoder_mut().copy_buffer_to_buffer(src, first_run as u64 * row, dst, 0, remaining as u64 * row);
        }
    }
}

impl KvCache for SlidingKvCache {
    fn append(&mut self, _context: &GpuContext, rec: &mut CommandRecorder, layer: usize, k: &Tensor, v: &Tensor, tokens: &[u32]) -> Result<()> {
        let n_tokens = tokens.len();
        let kdst = self.k[layer].clone();
        let vdst = self.v[layer].clone();
        self.write_wrapped(rec, k.buffer(), &kdst, n_tokens);
        self.write_wrapped(rec, v.buffer(), &vdst, n_tokens);
        self.pending = n_tokens;
        Ok(())
    }

    fn attention_inputs(&self, _context: &GpuContext, _rec: &mut CommandRecorder, layer: usize) -> Result<AttentionInputs> {
        let total = self.seq_len + self.pending;
        let kv_len = total.min(self.window_size) as u32;
        let base_offset = total.saturating_sub(self.window_size) as u32;
        Ok(AttentionInputs { k: self.k[layer].clone(), v: self.v[layer].clone(), kv_len, base_offset })
    }

    fn window_len(&self, _layer: usize) -> usize {
        self.window_size
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
