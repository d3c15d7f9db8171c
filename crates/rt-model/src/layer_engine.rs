use rt_tensor::kernels::{attention, cast, elementwise, gather, matmul, norm, rope, KernelLibrary};
use rt_tensor::{CommandRecorder, FinitenessBuffer, FinitenessGuard, Shape, Tensor};

use crate::config::{KvDType, ModelConfig, RuntimeConfig};
use crate::execution_plan::Plan;
use crate::kv_cache::KvCache;
use crate::layer_plan::{self, CANONICAL_PLAN};
use crate::moe;
use crate::rope_table::RopeTables;
use crate::error::{ModelError, Result};
use crate::weights::ModelWeights;

/// Executes the canonical pre-norm transformer block (attention, then
/// FFN, both residual) once per layer, against whichever weights, KV
/// cache layout, and dense/MoE FFN a model's manifest selected at load
/// time. Holds no per-step state of its own — everything it needs is
/// either borrowed per call or owned by the `KvCache` it's handed.
pub struct LayerEngine<'a> {
    config: &'a ModelConfig,
    runtime: &'a RuntimeConfig,
    weights: &'a ModelWeights,
    rope_tables: &'a RopeTables,
}

impl<'a> LayerEngine<'a> {
    pub fn new(config: &'a ModelConfig, runtime: &'a RuntimeConfig, weights: &'a ModelWeights, rope_tables: &'a RopeTables) -> Result<Self> {
        layer_plan::validate(CANONICAL_PLAN)?;
        Ok(Self { config, runtime, weights, rope_tables })
    }

    /// Runs one layer's forward pass over `x` (`[n_tokens, hidden_size]`),
    /// appending every GPU pass to `rec`. Does not call `kv.commit` —
    /// the caller does that once after every layer in a forward step has
    /// run, since all layers share one logical position counter. `plan` is
    /// the session's currently active plan (`PlanSession::active()`), and
    /// governs the finiteness policy checked when K/V narrows to f16 for
    /// storage; `finiteness` is the guard buffer to stamp on a trip, or
    /// `None` when the caller has no guard to wire (e.g. tests). `token_ids`
    /// carries the vocabulary id for each of `x`'s rows, forwarded to
    /// `kv.append` — every layout but BDPA ignores it.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_layer(
        &self,
        lib: &KernelLibrary,
        rec: &mut CommandRecorder,
        kv: &mut dyn KvCache,
        layer_idx: usize,
        x: &Tensor,
        base_pos: u32,
        plan: &Plan,
        finiteness: Option<&FinitenessBuffer>,
        token_ids: &[u32],
    ) -> Result<Tensor> {
        let cfg = self.config;
        let lw = &self.weights.layers[layer_idx];
        let n_tokens = x.shape().dim(0);

        let attn_norm_w = self.weight(&lw.attn_norm)?;
        let normed = norm::rms_norm_recorded(lib, rec, x, attn_norm_w.buffer(), cfg.rms_norm_eps, cfg.rms_norm_weight_offset)?;

        let (q, k, v) = self.project_qkv(lib, rec, lw, &normed, n_tokens)?;

        let local = cfg.layer_is_local(layer_idx);
        let (cos, sin) = self.rope_tables.for_layer(local);
        let q = rope::rope_recorded(lib, rec, &q, cos, sin, cfg.num_heads as u32, cfg.head_dim as u32, base_pos)?;
        let k = rope::rope_recorded(lib, rec, &k, cos, sin, cfg.num_kv_heads as u32, cfg.head_dim as u32, base_pos)?;

        let (k, v) = if self.runtime.kv_dtype == KvDType::F16 {
            let guard = finiteness.map(|buffer| FinitenessGuard { buffer, policy: plan.finiteness, layer: layer_idx as u32, step: base_pos });
            let k16 = cast::cast_f32_to_f16_recorded(lib, rec, &k, guard)?;
            let v16 = cast::cast_f32_to_f16_recorded(lib, rec, &v, guard)?;
            (k16, v16)
        } else {
            (k, v)
        };

        kv.append(lib.context(), rec, layer_idx, &k, &v, token_ids)?;
        let inputs = kv.attention_inputs(lib.context(), rec, layer_idx)?;

        let attn_out = attention::attention_recorded(
            lib,
            rec,
            &q,
            &inputs.k,
            &inputs.v,
            cfg.num_heads as u32,
            cfg.num_kv_heads as u32,
            cfg.head_dim as u32,
            inputs.kv_len,
            inputs.base_offset,
            cfg.attn_logit_softcapping,
        )?;
        let attn_out = reshape(&attn_out, vec![n_tokens, cfg.hidden_size]);

        let wo = self.weight(&lw.wo)?;
        let attn_proj = matmul::matmul_recorded(lib, rec, &attn_out, wo)?;
        let attn_proj = match &lw.post_attn_norm {
            Some(name) => {
                let w = self.weight(name)?;
                norm::rms_norm_recorded(lib, rec, &attn_proj, w.buffer(), cfg.rms_norm_eps, cfg.rms_norm_weight_offset)?
            }
            None => attn_proj,
        };

        let resid1 = elementwise::residual_add_recorded(lib, rec, x, &attn_proj)?;

        let ffn_norm_w = self.weight(&lw.ffn_norm)?;
        let ffn_in = norm::rms_norm_recorded(lib, rec, &resid1, ffn_norm_w.buffer(), cfg.rms_norm_eps, cfg.rms_norm_weight_offset)?;

        let ffn_out = match &cfg.moe {
            Some(moe_cfg) => moe::run_moe(lib, self.weights, lw, moe_cfg, &ffn_in, cfg.hidden_size)?,
            None => self.dense_ffn(lib, rec, lw, &ffn_in)?,
        };
        let ffn_out = match &lw.post_ffn_norm {
            Some(name) => {
                let w = self.weight(name)?;
                norm::rms_norm_recorded(lib, rec, &ffn_out, w.buffer(), cfg.rms_norm_eps, cfg.rms_norm_weight_offset)?
            }
            None => ffn_out,
        };

        elementwise::residual_add_recorded(lib, rec, &resid1, &ffn_out)
    }

    /// Produces `[n_tokens, num_heads, head_dim]` query and
    /// `[n_tokens, num_kv_heads, head_dim]` key/value tensors, either via
    /// one fused projection split three ways or three separate matmuls,
    /// whichever the manifest provided.
    fn project_qkv(&self, lib: &KernelLibrary, rec: &mut CommandRecorder, lw: &crate::weights::LayerWeights, normed: &Tensor, n_tokens: usize) -> Result<(Tensor, Tensor, Tensor)> {
        let cfg = self.config;
        let q_dim = cfg.num_heads * cfg.head_dim;
        let kv_dim = cfg.num_kv_heads * cfg.head_dim;

        if let Some(name) = &lw.qkv_fused {
            let w = self.weight(name)?;
            let fused = matmul::matmul_recorded(lib, rec, normed, w)?;
            let q = split_columns(lib, rec, &fused, 0, q_dim, q_dim + 2 * kv_dim)?;
            let k = split_columns(lib, rec, &fused, q_dim, kv_dim, q_dim + 2 * kv_dim)?;
            let v = split_columns(lib, rec, &fused, q_dim + kv_dim, kv_dim, q_dim + 2 * kv_dim)?;
            Ok((
                reshape(&q, vec![n_tokens, cfg.num_heads, cfg.head_dim]),
                reshape(&k, vec![n_tokens, cfg.num_kv_heads, cfg.head_dim]),
                reshape(&v, vec![n_tokens, cfg.num_kv_heads, cfg.head_dim]),
            ))
        } else {
            let wq = self.weight(lw.wq.as_ref().expect("split QKV layer missing wq"))?;
            let wk = self.weight(lw.wk.as_ref().expect("split QKV layer missing wk"))?;
            let wv = self.weight(lw.wv.as_ref().expect("split QKV layer missing wv"))?;
            let q = matmul::matmul_recorded(lib, rec, normed, wq)?;
            let k = matmul::matmul_recorded(lib, rec, normed, wk)?;
            let v = matmul::matmul_recorded(lib, rec, normed, wv)?;
            Ok((
                reshape(&q, vec![n_tokens, cfg.num_heads, cfg.head_dim]),
                reshape(&k, vec![n_tokens, cfg.num_kv_heads, cfg.head_dim]),
                reshape(&v, vec![n_tokens, cfg.num_kv_heads, cfg.head_dim]),
            ))
        }
    }

    fn dense_ffn(&self, lib: &KernelLibrary, rec: &mut CommandRecorder, lw: &crate::weights::LayerWeights, x: &Tensor) -> Result<Tensor> {
        let hidden = if let Some(name) = &lw.ffn_gate_up {
            let w = self.weight(name)?;
            let fused = matmul::matmul_recorded(lib, rec, x, w)?;
            let dim = w.shape().dim(0) as u32 / 2;
            rt_tensor::kernels::activation::silu_row_split_recorded(lib, rec, &fused, dim, false, None)?
        } else {
            let gate_w = self.weight(lw.ffn_gate.as_ref().expect("dense FFN layer missing gate weight"))?;
            let up_w = self.weight(lw.ffn_up.as_ref().expect("dense FFN layer missing up weight"))?;
            let gate = matmul::matmul_recorded(lib, rec, x, gate_w)?;
            let up = matmul::matmul_recorded(lib, rec, x, up_w)?;
            let act = rt_tensor::kernels::activation::silu_recorded(lib, rec, &gate)?;
            elementwise::mul_recorded(lib, rec, &act, &up)?
        };
        let down_w = self.weight(&lw.ffn_down)?;
        matmul::matmul_recorded(lib, rec, &hidden, down_w)
    }

    fn weight(&self, name: &str) -> Result<&rt_tensor::WeightEntry> {
        self.weights.get(name).ok_or_else(|| ModelError::MissingField(name.to_string()))
    }
}

/// Token embedding lookup, scaled by `sqrt(hidden_size)` when the
/// manifest's model config asks for it.
pub fn embed_tokens(lib: &KernelLibrary, rec: &mut CommandRecorder, weights: &ModelWeights, config: &ModelConfig, token_ids: &Tensor) -> Result<Tensor> {
    let table = weights.get(&weights.token_embd).ok_or_else(|| ModelError::MissingField(weights.token_embd.clone()))?;
    let embedded = gather::gather_recorded(lib, rec, token_ids, table.buffer(), config.hidden_size as u32, config.vocab_size as u32, false)?;
    if config.scale_embeddings {
        let scale = (config.hidden_size as f32).sqrt();
        elementwise::scale_recorded(lib, rec, &embedded, scale)
    } else {
        Ok(embedded)
    }
}

/// Reinterprets a tensor's shape without touching its buffer; valid only
/// when the new shape has the same element count and the data is already
/// laid out row-major for it (true for every reshape this engine does —
/// splitting fused QKV/FFN columns and flattening attention's head axis).
fn reshape(t: &Tensor, dims: Vec<usize>) -> Tensor {
    debug_assert_eq!(dims.iter().product::<usize>(), t.shape().numel());
    Tensor::from_recorded(t.context().clone(), t.arc_buffer(), Shape::new(dims), t.dtype())
}

/// Extracts columns `[start, start+width)` out of a `[rows, total_cols]`
/// tensor sharing the fused projection's buffer; used to split a fused
/// QKV or gate-up matmul output without an extra kernel dispatch when the
/// slice is contiguous to copy. Implemented as a host-blind GPU copy per
/// row, since WGSL has no strided-view primitive this engine can bind
/// without one. The copy is recorded into the caller's own recorder and
/// the output buffer comes from the shared pool, like every other
/// intermediate tensor in this engine — it must not open its own encoder
/// or submission, or it falls outside the one-recorder-per-step contract
/// the rest of the forward pass runs under.
fn split_columns(lib: &KernelLibrary, rec: &mut CommandRecorder, t: &Tensor, start: usize, width: usize, total_cols: usize) -> Result<Tensor> {
    let rows = t.shape().numel() / total_cols;
    let elem = t.dtype().size_in_bytes() as u64;
    let row_stride = total_cols as u64 * elem;
    let out_stride = width as u64 * elem;
    let bytes = rows as u64 * out_stride;

    let pooled = lib.pool().acquire(bytes.max(elem), "qkv split")?;
    let out_arc = rec.track(pooled);
    for r in 0..rows {
        rec.encoder_mut().copy_buffer_to_buffer(t.buffer(), r as u64 * row_stride + start as u64 * elem, &out_arc, r as u64 * out_stride, out_stride);
    }

    Ok(Tensor::from_recorded(t.context().clone(), out_arc, Shape::new(vec![rows, width]), t.dtype()))
}
