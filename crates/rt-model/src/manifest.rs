use rt_tensor::{DType, WeightLayout};

use crate::config::ModelConfig;

/// Per-layer attention flavor, as declared by the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionKind {
    Full,
    Sliding,
}

/// Quantization layout metadata the manifest attaches to a weight tensor
/// name, consulted when uploading Q4_K weights into a `WeightEntry`.
#[derive(Debug, Clone, Copy)]
pub struct WeightDescriptor {
    pub dtype: DType,
    pub layout: WeightLayout,
}

/// Contract the (out-of-scope) model loader implements so `loadModel` can
/// populate weights and compile a layer/execution plan without this crate
/// owning file parsing or shard download.
///
/// Every method here is expected to be cheap/synchronous: the manifest is
/// assumed fully resident in host memory (or memory-mapped) by the time
/// the driver calls `loadModel`.
pub trait ManifestSource {
    fn model_config(&self) -> &ModelConfig;

    /// Attention flavor of layer `idx`.
    fn attention_kind(&self, idx: usize) -> AttentionKind;

    /// Raw host bytes for a named tensor (e.g. `blk.3.attn_q.weight`).
    fn tensor_bytes(&self, name: &str) -> Option<&[u8]>;

    /// Quantization/layout metadata for a named tensor.
    fn weight_descriptor(&self, name: &str) -> Option<WeightDescriptor>;

    /// True if a fused QKV weight is present for layer `idx`.
    fn has_fused_qkv(&self, idx: usize) -> bool;

    /// Kernel path id selected for this manifest (e.g. "gemma2-q4k-f16").
    fn kernel_path_id(&self) -> &str;

    /// Token ids that terminate generation besides the tokenizer's EOS.
    fn stop_token_ids(&self) -> &[u32];

    fn eos_token_id(&self) -> u32;

    fn pad_token_id(&self) -> Option<u32>;
}
