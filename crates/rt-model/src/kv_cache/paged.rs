use rt_tensor::{BufferPool, CommandRecorder, DType, GpuContext, PooledBuffer, Result, Tensor};

use super::{AttentionInputs, KvCache};

/// Page table mapping logical position → physical page, acquired lazily
/// from the shared buffer pool. Used once `maxSeqLen` would overflow a
/// single storage binding, or once the runtime explicitly asks for it.
pub struct PagedKvCache {
    pool: BufferPool,
    kv_dim: usize,
    dtype_bytes: u64,
    page_size: usize,
    pages_k: Vec<Vec<PooledBuffer>>,
    pages_v: Vec<Vec<PooledBuffer>>,
    seq_len: usize,
    pending: usize,
}

impl PagedKvCache {
    pub fn new(pool: BufferPool, num_layers: usize, kv_dim: usize, page_size: usize, _dtype: DType) -> Self {
        Self {
            pool,
            kv_dim,
            dtype_bytes: _dtype.size_in_bytes() as u64,
            page_size,
            pages_k: (0..num_layers).map(|_| Vec::new()).collect(),
            pages_v: (0..num_layers).map(|_| Vec::new()).collect(),
            seq_len: 0,
            pending: 0,
        }
    }

    fn page_bytes(&self) -> u64 {
        self.kv_dim as u64 * self.page_size as u64 * self.dtype_bytes
    }

    fn ensure_pages(&mut self, layer: usize, upto_tokens: usize) -> Result<()> {
        let needed_pages = upto_tokens.div_ceil(self.page_size).max(1);
        let bytes = self.page_bytes();
        while self.pages_k[layer].len() < needed_pages {
            self.pages_k[layer].push(self.pool.acquire(bytes, "paged kv k")?);
            self.pages_v[layer].push(self.pool.acquire(bytes, "paged kv v")?);
        }
        Ok(())
    }

    /// Copy `n_tokens` rows starting at `self.seq_len` from a contiguous
    /// source tensor into this layer's page(s), splitting at page
    /// boundaries as needed.
    fn write_paged(&self, rec: &mut CommandRecorder, src: &wgpu::Buffer, pages: &[PooledBuffer], start: usize, n_tokens: usize) {
        let row = self.kv_dim as u64 * self.dtype_bytes;
        let mut remaining = n_tokens;
        let mut pos = start;
        let mut src_offset = 0u64;
        while remaining > 0 {
            let page_idx = pos / self.page_size;
            let slot = pos % self.page_size;
            let run = (self.page_size - slot).min(remaining);
            rec.encoder_mut().copy_buffer_to_buffer(
                src,
                src_offset,
                pages[page_idx].buffer(),
                slot as u64 * row,
                run as u64 * row,
            );
            pos += run;
            remaining -= run;
            src_offset += run as u64 * row;
        }
    }
}

impl KvCache for PagedKvCache {
    fn append(&mut self, _context: &GpuContext, rec: &mut CommandRecorder, layer: usize, k: &Tensor, v: &Tensor, tokens: &[u32]) -> Result<()> {
        let n_tokens = tokens.len();
        self.ensure_pages(layer, self.seq_len + n_tokens)?;
        self.write_paged(rec, k.buffer(), &self.pages_k[layer], self.seq_len, n_tokens);
        self.write_paged(rec, v.buffer(), &self.pages_v[layer], self.seq_len, n_tokens);
        self.pending = n_tokens;
        Ok(())
    }

    /// Materializes the logical window into one scratch buffer per side
    /// so the attention kernel can address it as if it were contiguous.
    fn attention_inputs(&self, context: &GpuContext, rec: &mut CommandRecorder, layer: usize) -> Result<AttentionInputs> {
        let kv_len = self.seq_len + self.pending;
        let row = self.kv_dim as u64 * self.dtype_bytes;
        let bytes = kv_len as u64 * row;
        let scratch_k = self.pool.acquire(bytes.max(1), "paged kv scratch k")?;
        let scratch_v = self.pool.acquire(bytes.max(1), "paged kv scratch v")?;

        let mut copy_all = |pages: &[PooledBuffer], dst: &wgpu::Buffer| {
            let mut pos = 0usize;
            while pos < kv_len {
                let page_idx = pos / self.page_size;
                let slot = pos % self.page_size;
                let run = (self.page_size - slot).min(kv_len - pos);
                rec.encoder_mut().copy_buffer_to_buffer(
                    pages[page_idx].buffer(),
                    slot as u64 * row,
                    dst,
                    pos as u64 * row,
                    run as u64 * row,
                );
                pos += run;
            }
        };
        copy_all(&self.pages_k[layer], scratch_k.buffer());
        copy_all(&self.pages_v[layer], scratch_v.buffer());

        let k = rec.track(scratch_k);
        let v = rec.track(scratch_v);
        let _ = context;
        Ok(AttentionInputs { k, v, kv_len: kv_len as u32, base_offset: 0 })
    }

    fn window_len(&self, _layer: usize) -> usize {
        usize::MAX
    }

    fn commit(&mut self, n_tokens: usize) {
        self.seq_len += n_tokens;
        self.pending = 0;
    }

    fn seq_len(&self) -> usize {
        self.seq_len
    }

    fn rewind(&mut self, seq_len: usize) {
        // Pages acquired past `seq_len` are released back to the pool;
        // truncating the page vectors drops their `PooledBuffer` guards.
        let needed_pages = seq_len.div_ceil(self.page_size).max(1);
        for pages in self.pages_k.iter_mut().chain(self.pages_v.iter_mut()) {
            pages.truncate(needed_pages);
        }
        self.seq_len = seq_len;
        self.pending = 0;
    }

    fn reset(&mut self) {
        for pages in self.pages_k.iter_mut().chain(self.pages_v.iter_mut()) {
            pages.clear();
        }
        self.seq_len = 0;
        self.pending = 0;
    }
}
