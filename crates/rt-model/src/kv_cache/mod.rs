mod bdpa;
mod contiguous;
mod paged;
mod sliding;
mod tiered;

pub use bdpa::BdpaKvCache;
pub use contiguous::ContiguousKvCache;
pub use paged::PagedKvCache;
pub use sliding::SlidingKvCache;
pub use tiered::TieredKvCache;

use std::sync::Arc;

use rt_tensor::{BufferPool, CommandRecorder, DType, GpuContext, Result, Tensor};

use crate::config::{KvDType, KvLayoutKind, ModelConfig, RuntimeConfig};
use crate::error::ModelError;

/// Above this `maxSeqLen`, a runtime-requested `contiguous` layout is
/// upgraded to `paged` rather than risking a single storage binding
/// overflow on devices with a tight per-binding limit.
pub const PAGED_THRESHOLD: usize = 8192;

/// The resolved, physically-contiguous K/V buffers and addressing window
/// an `attention` dispatch needs, whatever the underlying layout actually
/// stores. Paged/tiered/BDPA layouts materialize this by copying into a
/// scratch buffer; contiguous/sliding hand back their own storage by
/// reference.
pub struct AttentionInputs {
    pub k: Arc<wgpu::Buffer>,
    pub v: Arc<wgpu::Buffer>,
    pub kv_len: u32,
    pub base_offset: u32,
}

/// Shared interface across the five KV cache layouts. `append`/
/// `attention_inputs` both take the active recorder so writes and the
/// reads that depend on them stay ordered within one submission.
pub trait KvCache: Send {
    /// Write K/V for `tokens.len()` new positions starting at the cache's
    /// current sequence length. `tokens` carries the vocabulary id each
    /// row belongs to, in the same order as `k`/`v`'s rows — layouts that
    /// don't need token identity (everything but BDPA) ignore it.
    fn append(
        &mut self,
        context: &GpuContext,
        rec: &mut CommandRecorder,
        layer: usize,
        k: &Tensor,
        v: &Tensor,
        tokens: &[u32],
    ) -> Result<()>;

    /// Resolve this layer's current K/V window for an attention dispatch.
    fn attention_inputs(&self, context: &GpuContext, rec: &mut CommandRecorder, layer: usize) -> Result<AttentionInputs>;

    /// Number of positions addressable per layer (bounded for sliding
    /// windows, unbounded-until-maxSeqLen otherwise).
    fn window_len(&self, layer: usize) -> usize;

    /// Finalize the in-flight batch written by `append` calls since the
    /// last commit, advancing the cache's logical sequence length by
    /// `n_tokens`. Called once per forward step, after every layer's
    /// `append` (and any attention reads against the new positions) has
    /// been recorded — never mid-layer, since all layers share one
    /// logical position counter.
    fn commit(&mut self, n_tokens: usize);

    fn seq_len(&self) -> usize;

    /// Roll the cache back to `seq_len`, releasing any storage acquired
    /// past that point. Used by the finiteness-guard rewind contract.
    fn rewind(&mut self, seq_len: usize);

    fn reset(&mut self);
}

/// Picks and constructs the KV cache layout `loadModel` installs, applying
/// the documented upgrade/clamp rules before any layer runs:
/// sliding-window models requesting `contiguous` get clamped to the window
/// size instead; a `contiguous` request at or past `PAGED_THRESHOLD`
/// positions is upgraded to `paged`; `tiered` requires f16 KV.
pub fn build(context: &GpuContext, pool: &BufferPool, model: &ModelConfig, runtime: &RuntimeConfig) -> crate::error::Result<Box<dyn KvCache>> {
    let kv_dim = model.num_kv_heads * model.head_dim;
    let num_layers = model.num_layers;
    let dtype = match runtime.kv_dtype {
        KvDType::F16 => DType::F16,
        KvDType::F32 => DType::F32,
    };

    let mut layout = runtime.kv_layout;
    if let (Some(window), KvLayoutKind::Contiguous) = (model.sliding_window, layout) {
        layout = KvLayoutKind::Sliding { window_size: window };
    }
    if model.max_seq_len >= PAGED_THRESHOLD && matches!(layout, KvLayoutKind::Contiguous) {
        tracing::warn!(max_seq_len = model.max_seq_len, "upgrading contiguous KV layout to paged past PAGED_THRESHOLD");
        layout = KvLayoutKind::Paged { page_size: 128 };
    }
    if matches!(layout, KvLayoutKind::Tiered { .. }) && !matches!(runtime.kv_dtype, KvDType::F16) {
        return Err(ModelError::InvalidLayout("tiered KV layout requires f16 KV dtype".to_string()));
    }

    Ok(match layout {
        KvLayoutKind::Contiguous => Box::new(contiguous::ContiguousKvCache::new(context, num_layers, kv_dim, model.max_seq_len, dtype)?),
        KvLayoutKind::Sliding { window_size } => Box::new(sliding::SlidingKvCache::new(context, num_layers, kv_dim, window_size, dtype)?),
        KvLayoutKind::Paged { page_size } => Box::new(paged::PagedKvCache::new(pool.clone(), num_layers, kv_dim, page_size, dtype)),
        KvLayoutKind::Tiered { mode } => {
            let hot_page_capacity = (model.max_seq_len / 128).max(1);
            Box::new(tiered::TieredKvCache::new(pool.clone(), num_layers, kv_dim, 128, hot_page_capacity, mode))
        }
        KvLayoutKind::Bdpa => Box::new(bdpa::BdpaKvCache::new(pool.clone(), num_layers, kv_dim, 128, dtype)),
    })
}
