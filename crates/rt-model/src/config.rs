/// How a MoE layer's router output is turned into per-expert weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpertFormat {
    /// Softmax over all experts, then take top-k.
    Dense,
    /// Softmax over all experts, take top-k, renormalize the selected
    /// weights to sum to 1.
    Mixtral,
    /// Sigmoid per-expert gate, then take top-k (no renormalization).
    GptOss,
}

/// Mixture-of-experts parameters; `None` at the model level means every
/// layer is a dense FFN.
#[derive(Debug, Clone, Copy)]
pub struct MoeConfig {
    pub num_experts: usize,
    pub top_k: usize,
    pub expert_format: ExpertFormat,
}

/// RoPE scaling strategy applied on top of the base frequency.
#[derive(Debug, Clone, Copy)]
pub enum RopeScaling {
    Linear { factor: f32 },
    Yarn {
        factor: f32,
        beta_fast: f32,
        beta_slow: f32,
        original_max_pos: usize,
    },
}

/// Which chat-formatting convention a model's manifest declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplateType {
    TurnBased,
    HeaderBased,
    ChannelBased,
    ChatMl,
}

/// Immutable, per-model configuration. Populated by the (out-of-scope)
/// manifest loader via `ManifestSource`; never mutated after `loadModel`.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub num_layers: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub vocab_size: usize,
    pub max_seq_len: usize,
    pub rms_norm_eps: f32,
    pub rms_norm_weight_offset: bool,
    pub rope_theta: f32,
    pub rope_local_theta: Option<f32>,
    pub rope_scaling: Option<RopeScaling>,
    pub sliding_window: Option<usize>,
    pub final_logit_softcapping: Option<f32>,
    pub attn_logit_softcapping: Option<f32>,
    pub moe: Option<MoeConfig>,
    pub scale_embeddings: bool,
    pub tied_embeddings: bool,
    pub chat_template_type: ChatTemplateType,
}

impl ModelConfig {
    /// Grouped-query attention group size; callers must check
    /// `num_kv_heads` divides `num_heads` before relying on this.
    pub fn heads_per_kv(&self) -> usize {
        self.num_heads / self.num_kv_heads
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.num_heads % self.num_kv_heads != 0 {
            return Err(crate::ModelError::InvalidGqaRatio {
                num_heads: self.num_heads,
                num_kv_heads: self.num_kv_heads,
            });
        }
        Ok(())
    }

    /// Whether layer `idx` uses the local (sliding-window) RoPE base and
    /// attention type. The canonical interleaving is every other layer
    /// local when both a sliding window and a local theta are configured;
    /// models that are uniformly global or uniformly local set one of the
    /// two fields to `None`.
    pub fn layer_is_local(&self, idx: usize) -> bool {
        self.sliding_window.is_some() && self.rope_local_theta.is_some() && idx % 2 == 0
    }
}

/// Per-session runtime knobs; mutable across the life of one driver
/// session but never shared between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationDType {
    F16,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvDType {
    F16,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieredMode {
    Lru,
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvLayoutKind {
    Contiguous,
    Paged { page_size: usize },
    Sliding { window_size: usize },
    Tiered { mode: TieredMode },
    Bdpa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCheckMode {
    Batch,
    PerToken,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchingConfig {
    pub batch_size: usize,
    pub readback_interval: usize,
    pub stop_check_mode: StopCheckMode,
    pub max_tokens: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self { batch_size: 1, readback_interval: 1, stop_check_mode: StopCheckMode::PerToken, max_tokens: 256 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingDefaults {
    pub greedy_threshold: f32,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self { greedy_threshold: 0.05, temperature: 0.8, top_k: 40, top_p: 0.95, repetition_penalty: 1.1 }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub activation_dtype: ActivationDType,
    pub kv_dtype: KvDType,
    pub kv_layout: KvLayoutKind,
    pub batching: BatchingConfig,
    pub sampling: SamplingDefaults,
    pub finiteness: rt_tensor::FinitenessPolicy,
    pub kernel_path: String,
}

impl RuntimeConfig {
    /// Pick a KV dtype default per the rule: f16 when the model hasn't
    /// opted into f32-for-softcap.
    pub fn default_kv_dtype(model: &ModelConfig) -> KvDType {
        if model.attn_logit_softcapping.is_some() {
            KvDType::F32
        } else {
            KvDType::F16
        }
    }
}
