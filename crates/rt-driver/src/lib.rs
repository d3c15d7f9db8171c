//! Async generation driver: ties together a loaded model's weights, KV
//! cache, and execution plan behind a token-streaming `generate()` and a
//! set of fine-grained prefill/decode primitives for callers that need
//! their own sampling or speculative-decoding loop.

pub mod chat_template;
pub mod error;
pub mod ring;
pub mod stats;
pub mod tokenizer;
mod tokens;

pub use error::{DriverError, Result};
pub use stats::GenerationStats;
pub use tokenizer::Tokenizer;

use std::time::Instant;

use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use rt_model::config::{ChatTemplateType, KvLayoutKind, ModelConfig, RuntimeConfig, StopCheckMode};
use rt_model::kv_cache::{self, KvCache};
use rt_model::rope_table::RopeTables;
use rt_model::{embed_tokens, layer_engine::LayerEngine, logits, ManifestSource, ModelWeights};
use rt_tensor::kernels::sampling::{argmax_recorded, check_stop_recorded, gpu_sample_recorded};
use rt_tensor::kernels::KernelLibrary;
use rt_tensor::{BufferPool, CommandRecorder, FinitenessBuffer, GpuContext, Tensor};

use ring::DecodeRing;
use tokens::upload_token_ids;

/// Sampling and length knobs for one `generate()` call. Falls back to the
/// runtime's `SamplingDefaults` for any field the caller leaves at its
/// `Default`.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub seed: u64,
    /// Generation stops once the decoded suffix ends with any of these,
    /// checked after each token (or each token of a batch) is appended.
    pub stop_sequences: Vec<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { max_tokens: 256, temperature: 0.8, top_k: 40, top_p: 0.95, repetition_penalty: 1.1, seed: 0, stop_sequences: Vec::new() }
    }
}

/// How `prefill_with_embedding` reduces a prompt's per-token hidden
/// states to one pooled vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingPooling {
    /// The final token's hidden state only.
    Last,
    /// The mean of every token's hidden state.
    Mean,
}

/// Marker returned by `prefill_kv_only`, rewindable via
/// `generate_with_prefix_kv`. Records only the sequence length the cache
/// had reached — this build keeps one KV cache instance per `Driver`
/// rather than cloning its GPU buffers per snapshot, so "restoring" a
/// snapshot means rewinding the live cache back to that length rather than
/// swapping in an independent copy. Safe as long as a driver only ever
/// resumes its own most recent snapshot, which is the only pattern
/// `generate_with_prefix_kv` exposes.
#[derive(Debug, Clone, Copy)]
pub struct KvSnapshot {
    pub seq_len: usize,
}

/// Orchestrates prefill and decode for one loaded model. Not `Clone` or
/// `Sync` — a session's KV cache and execution-plan state are exclusive to
/// whichever task drives it, matching the cooperative single-generation
/// contract `generate()` enforces via `is_generating`.
pub struct Driver {
    context: GpuContext,
    lib: KernelLibrary,
    model: ModelConfig,
    runtime: RuntimeConfig,
    weights: ModelWeights,
    rope_tables: RopeTables,
    kv: Box<dyn KvCache>,
    plan_session: rt_model::PlanSession,
    finiteness: FinitenessBuffer,
    tokenizer: Box<dyn Tokenizer>,
    stop_token_ids: Vec<u32>,
    eos_token_id: u32,
    pad_token_id: Option<u32>,
    chat_template: ChatTemplateType,
    seq_len: usize,
    recent_tokens: Vec<u32>,
    pending_token: Option<u32>,
    pending_embedding: Option<Vec<f32>>,
    stats: GenerationStats,
    is_generating: bool,
}

impl Driver {
    /// Opens a GPU device, uploads every weight the manifest exposes, and
    /// compiles the KV layout and execution plan the rest of the session
    /// runs under. Mirrors a loader's usual shape: one upfront pass that
    /// never touches the network or disk itself (that's the manifest's
    /// job), followed by a purely in-memory/GPU session.
    pub async fn load_model(manifest: &dyn ManifestSource, tokenizer: Box<dyn Tokenizer>, runtime: RuntimeConfig) -> Result<Self> {
        let model = manifest.model_config().clone();
        model.validate()?;

        let context = GpuContext::new().await?;
        let pool = BufferPool::new(context.clone());
        let lib = KernelLibrary::new(context.clone(), pool.clone());

        let weights = ModelWeights::load(&context, manifest, &model)?;
        let rope_tables = RopeTables::build(&context, &model)?;
        let kv = kv_cache::build(&context, &pool, &model, &runtime)?;
        let finiteness = FinitenessBuffer::new(&context, &pool)?;
        let plan = rt_model::ExecutionPlan::compile(&model, &runtime);

        Ok(Self {
            context,
            lib,
            chat_template: model.chat_template_type,
            model,
            runtime,
            weights,
            rope_tables,
            kv,
            plan_session: rt_model::PlanSession::new(plan),
            finiteness,
            stop_token_ids: manifest.stop_token_ids().to_vec(),
            eos_token_id: manifest.eos_token_id(),
            pad_token_id: manifest.pad_token_id(),
            tokenizer,
            seq_len: 0,
            recent_tokens: Vec::new(),
            pending_token: None,
            pending_embedding: None,
            stats: GenerationStats::default(),
            is_generating: false,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn get_stats(&self) -> GenerationStats {
        self.stats.clone()
    }

    /// Releases this session's GPU state. A no-op beyond dropping `self` —
    /// weight and KV buffers are owned outright and freed when the
    /// `Driver` goes out of scope — kept as an explicit call so callers
    /// have a named point to retire a session at, matching the
    /// load/unload pair every other resource in this crate follows.
    pub fn unload(self) {
        drop(self);
    }

    /// Streams generated text for one turn, formatted through the model's
    /// chat template, tokenized, prefilled, and decoded one token at a
    /// time until EOS, a configured stop token, `max_tokens`, or
    /// cancellation. Only one `generate()` may run at a time per driver;
    /// a second concurrent call observes `DriverError::AlreadyGenerating`.
    pub fn generate<'a>(&'a mut self, prompt: &'a str, opts: GenerateOptions, cancel: Option<CancellationToken>) -> impl Stream<Item = Result<String>> + 'a {
        async_stream::try_stream! {
            if self.is_generating {
                bail(DriverError::AlreadyGenerating)?;
            }
            self.is_generating = true;
            self.stats = GenerationStats::default();

            let sampling = rt_sampler::SamplingOptions {
                temperature: opts.temperature,
                top_k: opts.top_k,
                top_p: opts.top_p,
                repetition_penalty: opts.repetition_penalty,
                greedy_threshold: self.runtime.sampling.greedy_threshold,
            };

            let formatted = chat_template::format_turn(self.chat_template, prompt);
            let prompt_tokens = self.tokenizer.encode(&formatted);
            self.recent_tokens.clear();
            self.recent_tokens.extend_from_slice(&prompt_tokens);

            let prefill_start = Instant::now();
            let logits = self.prefill_with_logits(&prompt_tokens).await.inspect_err(|_| self.is_generating = false)?;
            self.stats.record_prefill(prefill_start.elapsed());
            self.stats.record_ttft(prefill_start.elapsed());

            let max_tokens = opts.max_tokens.min(self.runtime.batching.max_tokens);
            let mut next_token = rt_sampler::sample(&logits, &self.recent_tokens, &sampling, opts.seed, self.pad_token_id);
            let mut produced = 0usize;

            // readbackInterval caps how many steps run per recorder before the ring
            // is read back, independent of batchSize's GPU-sampling chunk size.
            let batched = self.runtime.batching.batch_size > 1
                && !matches!(self.runtime.kv_layout, KvLayoutKind::Bdpa)
                && device_sampling_available(&opts);

            let mut generated_text = String::new();

            'outer: loop {
                if produced >= max_tokens {
                    break;
                }
                if next_token == self.eos_token_id || self.stop_token_ids.contains(&next_token) {
                    break;
                }
                if let Some(c) = &cancel {
                    if c.is_cancelled() {
                        break;
                    }
                }

                if batched {
                    let k = self.runtime.batching.batch_size.min(self.runtime.batching.readback_interval).min(max_tokens - produced);
                    let step_start = Instant::now();
                    let (tokens, stop_flags) = self.decode_batch(next_token, k, &sampling, opts.seed.wrapping_add(produced as u64)).await.inspect_err(|_| self.is_generating = false)?;
                    self.stats.record_decode_step(step_start.elapsed());

                    for (i, tok) in tokens.into_iter().enumerate() {
                        self.recent_tokens.push(tok);
                        let text = self.tokenizer.decode(&[tok]);
                        generated_text.push_str(&text);
                        yield text;
                        produced += 1;
                        next_token = tok;

                        let per_token_stop = self.runtime.batching.stop_check_mode == StopCheckMode::PerToken
                            && stop_flags.get(i).copied().unwrap_or(0) != 0;
                        let matched_stop_sequence = matches_any_stop_sequence(&generated_text, &opts.stop_sequences);
                        if tok == self.eos_token_id || self.stop_token_ids.contains(&tok) || per_token_stop || matched_stop_sequence || produced >= max_tokens {
                            break 'outer;
                        }
                    }
                    continue;
                }

                self.recent_tokens.push(next_token);
                let text = self.tokenizer.decode(&[next_token]);
                generated_text.push_str(&text);
                yield text;
                produced += 1;

                if produced >= max_tokens || matches_any_stop_sequence(&generated_text, &opts.stop_sequences) {
                    break;
                }

                let step_start = Instant::now();
                let step_logits = self.decode_step_logits(next_token).await.inspect_err(|_| self.is_generating = false)?;
                self.advance_with_token(next_token).ok();
                self.stats.record_decode_step(step_start.elapsed());
                next_token = rt_sampler::sample(&step_logits, &self.recent_tokens, &sampling, opts.seed.wrapping_add(produced as u64), self.pad_token_id);
            }

            self.is_generating = false;
        }
    }

    /// Runs every layer over `tokens`, writing their K/V into the cache,
    /// and returns the vocabulary logits for the last position. Advances
    /// the session's sequence length by `tokens.len()`.
    pub async fn prefill_with_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
        let pre_len = self.seq_len;
        let base_pos = self.seq_len as u32;
        let mut rec = self.lib.recorder();
        let x = self.run_layers(&mut rec, tokens, base_pos)?;
        let raw_logits = logits::compute_logits(
            &self.lib,
            &mut rec,
            &self.weights,
            &x,
            self.model.rms_norm_eps,
            self.model.rms_norm_weight_offset,
            self.model.final_logit_softcapping,
        )?;
        let readable = to_host_readable(&self.lib, &mut rec, &raw_logits, "prefill logits")?;
        rec.submit().await;

        if self.check_finiteness_triggered(pre_len)? {
            return Err(DriverError::FinitenessError);
        }
        self.seq_len += tokens.len();
        Ok(readable.read_to_vec()?)
    }

    /// Runs every layer over `tokens` and pools the final-normed hidden
    /// states into one `hiddenSize`-length embedding, without ever
    /// materializing vocabulary logits. Advances the session's sequence
    /// length like `prefill_with_logits`. `Mean` pooling reads the whole
    /// `⟨T, hiddenSize⟩` normed tensor back and averages host-side, the
    /// same tradeoff MoE routing makes for its small, infrequent
    /// readbacks.
    pub async fn prefill_with_embedding(&mut self, tokens: &[u32], pooling: EmbeddingPooling) -> Result<Vec<f32>> {
        let pre_len = self.seq_len;
        let base_pos = self.seq_len as u32;
        let hidden_size = self.model.hidden_size;
        let mut rec = self.lib.recorder();
        let x = self.run_layers(&mut rec, tokens, base_pos)?;
        let normed = logits::final_norm(&self.lib, &mut rec, &self.weights, &x, self.model.rms_norm_eps, self.model.rms_norm_weight_offset)?;
        let readable = to_host_readable(&self.lib, &mut rec, &normed, "prefill embedding")?;
        rec.submit().await;

        if self.check_finiteness_triggered(pre_len)? {
            return Err(DriverError::FinitenessError);
        }
        self.seq_len += tokens.len();

        let rows = readable.read_to_vec()?;
        Ok(match pooling {
            EmbeddingPooling::Last => rows[rows.len() - hidden_size..].to_vec(),
            EmbeddingPooling::Mean => {
                let mut pooled = vec![0.0f32; hidden_size];
                for row in rows.chunks_exact(hidden_size) {
                    for (p, v) in pooled.iter_mut().zip(row) {
                        *p += v;
                    }
                }
                let n = (rows.len() / hidden_size).max(1) as f32;
                pooled.iter_mut().for_each(|p| *p /= n);
                pooled
            }
        })
    }

    /// Runs every layer over `tokens` purely to populate the KV cache,
    /// without computing logits. Returns a snapshot of the resulting
    /// sequence length for `generate_with_prefix_kv`.
    pub async fn prefill_kv_only(&mut self, tokens: &[u32]) -> Result<KvSnapshot> {
        let pre_len = self.seq_len;
        let base_pos = self.seq_len as u32;
        let mut rec = self.lib.recorder();
        self.run_layers(&mut rec, tokens, base_pos)?;
        rec.submit().await;

        if self.check_finiteness_triggered(pre_len)? {
            return Err(DriverError::FinitenessError);
        }
        self.seq_len += tokens.len();
        Ok(KvSnapshot { seq_len: self.seq_len })
    }

    /// Rewinds the live KV cache back to a prior `prefill_kv_only`
    /// snapshot and runs one `generate()` turn from there, as if the
    /// tokens prefilled after the snapshot had never happened. Only valid
    /// while the snapshot's cache state hasn't already been evicted
    /// (sliding/tiered layouts may have dropped positions past their
    /// window since the snapshot was taken).
    pub async fn generate_with_prefix_kv(&mut self, snapshot: KvSnapshot, prompt: &str, opts: GenerateOptions, cancel: Option<CancellationToken>) -> Result<Vec<String>> {
        self.kv.rewind(snapshot.seq_len);
        self.seq_len = snapshot.seq_len;

        use futures_util::StreamExt as _;
        let mut out = Vec::new();
        let mut s = std::pin::pin!(self.generate(prompt, opts, cancel));
        while let Some(chunk) = s.as_mut().next().await {
            out.push(chunk?);
        }
        Ok(out)
    }

    /// Computes logits for `token` at the current sequence position
    /// without committing it: the layer engine's K/V writes land in the
    /// cache's pending (uncommitted) slot, visible to this step's own
    /// attention but not yet part of the cache's logical length. Pair
    /// with `advance_with_token` to make the step permanent.
    pub async fn decode_step_logits(&mut self, token: u32) -> Result<Vec<f32>> {
        let pre_len = self.seq_len;
        let base_pos = self.seq_len as u32;
        let mut rec = self.lib.recorder();
        let indices = upload_token_ids(&self.lib, &[token])?;
        let x = self.run_layers_from_indices(&mut rec, &indices, base_pos, &[token])?;
        let raw_logits = logits::compute_logits(
            &self.lib,
            &mut rec,
            &self.weights,
            &x,
            self.model.rms_norm_eps,
            self.model.rms_norm_weight_offset,
            self.model.final_logit_softcapping,
        )?;
        let readable = to_host_readable(&self.lib, &mut rec, &raw_logits, "decode logits")?;
        rec.submit().await;

        if self.check_finiteness_triggered(pre_len)? {
            return Err(DriverError::FinitenessError);
        }
        self.pending_token = Some(token);
        self.pending_embedding = None;
        Ok(readable.read_to_vec()?)
    }

    /// Like `decode_step_logits`, but also captures the step's normed
    /// hidden state so `advance_with_token_and_embedding` can hand it back
    /// alongside the commit, at the cost of one extra host readback this
    /// step. Prefer `decode_step_logits` when the embedding isn't needed —
    /// `generate()`'s own decode loop always does.
    pub async fn decode_step_logits_with_embedding(&mut self, token: u32) -> Result<Vec<f32>> {
        let pre_len = self.seq_len;
        let base_pos = self.seq_len as u32;
        let mut rec = self.lib.recorder();
        let indices = upload_token_ids(&self.lib, &[token])?;
        let x = self.run_layers_from_indices(&mut rec, &indices, base_pos, &[token])?;
        let normed = logits::final_norm(&self.lib, &mut rec, &self.weights, &x, self.model.rms_norm_eps, self.model.rms_norm_weight_offset)?;
        let raw_logits = logits::project(&self.lib, &mut rec, &self.weights, &normed, self.model.final_logit_softcapping)?;
        let logits_readable = to_host_readable(&self.lib, &mut rec, &raw_logits, "decode logits")?;
        let embedding_readable = to_host_readable(&self.lib, &mut rec, &normed, "decode embedding")?;
        rec.submit().await;

        if self.check_finiteness_triggered(pre_len)? {
            return Err(DriverError::FinitenessError);
        }
        self.pending_token = Some(token);
        self.pending_embedding = Some(embedding_readable.read_to_vec()?);
        Ok(logits_readable.read_to_vec()?)
    }

    /// Commits the pending K/V written by the last `decode_step_logits`
    /// call, advancing the session by one position and recording `token`
    /// as the sequence's last token. `token` must match what was passed
    /// to `decode_step_logits` — this build does not support committing a
    /// different token than the one whose K/V was actually computed, so a
    /// rejected speculative token must be re-run through
    /// `decode_step_logits` rather than committed here.
    pub fn advance_with_token(&mut self, token: u32) -> Result<()> {
        match self.pending_token.take() {
            Some(pending) if pending == token => {
                self.kv.commit(1);
                self.seq_len += 1;
                Ok(())
            }
            _ => Err(DriverError::Programmer("advance_with_token called without a matching decode_step_logits pending commit".to_string())),
        }
    }

    /// Like `advance_with_token`, but also returns the pending step's
    /// normed hidden state. Only valid after `decode_step_logits_with_embedding`
    /// — a plain `decode_step_logits` call clears any pending embedding.
    pub fn advance_with_token_and_embedding(&mut self, token: u32) -> Result<Vec<f32>> {
        self.advance_with_token(token)?;
        self.pending_embedding
            .take()
            .ok_or_else(|| DriverError::Programmer("advance_with_token_and_embedding called without a pending decode_step_logits_with_embedding commit".to_string()))
    }

    fn run_layers(&mut self, rec: &mut CommandRecorder, token_ids: &[u32], base_pos: u32) -> Result<Tensor> {
        let indices = upload_token_ids(&self.lib, token_ids)?;
        let x = self.run_layers_from_indices(rec, &indices, base_pos, token_ids)?;
        self.kv.commit(token_ids.len());
        Ok(x)
    }

    fn run_layers_from_indices(&mut self, rec: &mut CommandRecorder, indices: &Tensor, base_pos: u32, token_ids: &[u32]) -> Result<Tensor> {
        let mut x = embed_tokens(&self.lib, rec, &self.weights, &self.model, indices)?;
        let engine = LayerEngine::new(&self.model, &self.runtime, &self.weights, &self.rope_tables)?;
        let plan = self.plan_session.active().clone();
        for layer_idx in 0..self.model.num_layers {
            x = engine.forward_layer(&self.lib, rec, self.kv.as_mut(), layer_idx, &x, base_pos, &plan, Some(&self.finiteness), token_ids)?;
        }
        Ok(x)
    }

    /// Reads the finiteness guard's status after a submission and, if it
    /// fired, drives the session's `PlanSession` and rewinds the cache
    /// back to `pre_len`. Returns `true` only once the session has
    /// exhausted its fallback and the caller should surface
    /// `DriverError::FinitenessError`.
    fn check_finiteness_triggered(&mut self, pre_len: usize) -> Result<bool> {
        if !self.plan_session.active().finiteness.enabled {
            return Ok(false);
        }
        let status = self.finiteness.read()?;
        if status.triggered == 0 {
            return Ok(false);
        }
        let state = self.plan_session.on_finiteness_triggered();
        self.kv.rewind(pre_len);
        self.seq_len = pre_len;
        Ok(state == rt_model::PlanState::Error)
    }

    /// Runs `k` decode steps back to back in one command buffer, sampling
    /// each step's token on the GPU into a shared ring so the whole batch
    /// reads back once instead of once per token. An alternative to the
    /// one-token-at-a-time loop `generate()` runs, for callers that want
    /// to drive batched decoding themselves (`batching.batch_size > 1`).
    /// BDPA's single-centroid page write isn't compatible with a
    /// multi-step in-flight ring; callers configured for BDPA should stay
    /// on the single-step path.
    pub async fn decode_batch(&mut self, seed_token: u32, k: usize, opts: &rt_sampler::SamplingOptions, seed: u64) -> Result<(Vec<u32>, Vec<u32>)> {
        let pre_len = self.seq_len;
        let ring = DecodeRing::new(&self.lib, k)?;
        ring.seed(&self.lib, seed_token);

        let mut rec = self.lib.recorder();
        let pad = self.pad_token_id.unwrap_or(u32::MAX);
        for step in 0..k {
            let base_pos = (self.seq_len + step) as u32;
            let input = ring.input_at(&self.lib, &mut rec, step);
            // Steps after the seed sample their own token on the GPU, so no
            // real host-side token id exists yet for kv.append's tokens
            // slice — only its length (always 1, one row per step) matters
            // to every layout but BDPA, which is excluded from this
            // ring-based path (see this fn's doc comment) and so never
            // reads this placeholder id.
            let x = self.run_layers_from_indices(&mut rec, &input, base_pos, &[u32::MAX])?;
            self.kv.commit(1);
            let step_logits = logits::compute_logits(
                &self.lib,
                &mut rec,
                &self.weights,
                &x,
                self.model.rms_norm_eps,
                self.model.rms_norm_weight_offset,
                self.model.final_logit_softcapping,
            )?;

            if opts.temperature < opts.greedy_threshold {
                argmax_recorded(&self.lib, &mut rec, &step_logits, &ring.tokens, (step + 1) as u32, pad, self.model.final_logit_softcapping)?;
            } else {
                gpu_sample_recorded(
                    &self.lib,
                    &mut rec,
                    &step_logits,
                    &ring.tokens,
                    (step + 1) as u32,
                    pad,
                    opts.top_k as u32,
                    opts.temperature,
                    seed.wrapping_add(step as u64) as u32,
                    self.model.final_logit_softcapping,
                )?;
            }

            if self.runtime.batching.stop_check_mode == StopCheckMode::PerToken {
                check_stop_recorded(&self.lib, &mut rec, &ring.tokens, &ring.stop_flags, step as u32, self.eos_token_id, base_pos + 1, self.runtime.batching.max_tokens as u32)?;
            }
        }
        rec.submit().await;

        if self.check_finiteness_triggered(pre_len)? {
            return Err(DriverError::FinitenessError);
        }
        self.seq_len += k;

        let tokens: Vec<u32> = ring.read_tokens()?;
        let stop_flags: Vec<u32> = ring.read_stop_flags()?;
        Ok((tokens[1..].to_vec(), stop_flags))
    }
}

/// Copies `t` (however it's backed) into a freshly pool-acquired,
/// non-recorder-owned buffer so it can be read back to the host once the
/// recorder that produced it has been submitted. `Tensor`'s own recorded
/// tensors refuse `read_to_vec` unconditionally (the flag marks buffer
/// *ownership*, not submission state), so anything a caller needs back on
/// the host has to land in a separately pool-owned tensor first — the
/// same seam `DecodeRing`'s sampling outputs and the finiteness status
/// buffer already stand on.
fn to_host_readable(lib: &KernelLibrary, rec: &mut CommandRecorder, t: &Tensor, label: &str) -> rt_tensor::Result<Tensor> {
    let out = Tensor::zeros(lib.context(), lib.pool(), t.shape().clone(), t.dtype(), label)?;
    rec.encoder_mut().copy_buffer_to_buffer(t.buffer(), 0, out.buffer(), 0, t.byte_len());
    Ok(out)
}

/// Whether `opts` asks for nothing the GPU sampling kernels can't express.
/// `gpuSample` only implements top-k and temperature; repetition penalty
/// and top-p are host-only (`rt_sampler::pipeline::sample`), so batched
/// decode is only equivalent to the single-step path when both are
/// effectively disabled.
fn device_sampling_available(opts: &GenerateOptions) -> bool {
    (opts.repetition_penalty - 1.0).abs() < 1e-6 && opts.top_p >= 1.0 - 1e-6
}

/// Whether `text`'s decoded suffix matches any configured stop sequence.
/// Empty strings never match (an empty `stopSequences` entry would
/// otherwise trivially match every step).
fn matches_any_stop_sequence(text: &str, stops: &[String]) -> bool {
    stops.iter().any(|s| !s.is_empty() && text.ends_with(s.as_str()))
}

/// Raises `e` from inside a `try_stream!` block with a concrete `Ok` type,
/// sidestepping the type ambiguity a bare `Err(e)?` would leave for the
/// compiler when the value is never bound to anything.
fn bail(e: DriverError) -> Result<()> {
    Err(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(repetition_penalty: f32, top_p: f32) -> GenerateOptions {
        GenerateOptions { repetition_penalty, top_p, ..GenerateOptions::default() }
    }

    #[test]
    fn device_sampling_available_requires_neutral_penalty_and_top_p() {
        assert!(device_sampling_available(&opts(1.0, 1.0)));
        assert!(!device_sampling_available(&opts(1.1, 1.0)));
        assert!(!device_sampling_available(&opts(1.0, 0.95)));
    }

    #[test]
    fn stop_sequence_matches_decoded_suffix() {
        let stops = vec!["</s>".to_string(), "STOP".to_string()];
        assert!(matches_any_stop_sequence("hello</s>", &stops));
        assert!(matches_any_stop_sequence("the answer is STOP", &stops));
        assert!(!matches_any_stop_sequence("hello world", &stops));
    }

    #[test]
    fn empty_stop_sequence_never_matches() {
        let stops = vec![String::new()];
        assert!(!matches_any_stop_sequence("anything", &stops));
    }

    #[test]
    fn no_stop_sequences_never_matches() {
        assert!(!matches_any_stop_sequence("anything", &[]));
    }
}
