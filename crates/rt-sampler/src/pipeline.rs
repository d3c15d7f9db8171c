use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::repetition::RepetitionPenaltySampler;
use crate::sampler::{Sampler, TokenLogit};
use crate::temperature::TemperatureSampler;
use crate::top_k::TopKSampler;
use crate::top_p::TopPSampler;

/// Per-call sampling knobs, as carried by a session's runtime config and
/// overridable per `generate` call.
#[derive(Debug, Clone, Copy)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub greedy_threshold: f32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            repetition_penalty: 1.1,
            greedy_threshold: 0.05,
        }
    }
}

/// CPU sampling pipeline: below `greedyThreshold`, argmax (ignoring
/// `padTokenId`); otherwise repetition penalty → temperature → top-k →
/// top-p → multinomial draw from the resulting softmax, seeded so two
/// calls with the same seed and logits reproduce the same token.
pub fn sample(logits: &[f32], recent_tokens: &[u32], opts: &SamplingOptions, seed: u64, pad_token_id: Option<u32>) -> u32 {
    if opts.temperature < opts.greedy_threshold {
        return argmax(logits, pad_token_id);
    }

    let mut token_logits: Vec<TokenLogit> = logits
        .iter()
        .enumerate()
        .map(|(i, &logit)| TokenLogit { token_id: i as u32, logit })
        .collect();

    let mut repetition = RepetitionPenaltySampler::new(opts.repetition_penalty, recent_tokens.len().max(1));
    for &t in recent_tokens {
        repetition.add_token(t);
    }
    repetition.apply(&mut token_logits);
    TemperatureSampler::new(opts.temperature).apply(&mut token_logits);
    TopKSampler::new(opts.top_k).apply(&mut token_logits);
    TopPSampler::new(opts.top_p).apply(&mut token_logits);

    draw(&token_logits, seed)
}

fn argmax(logits: &[f32], pad_token_id: Option<u32>) -> u32 {
    logits
        .iter()
        .enumerate()
        .filter(|&(i, _)| pad_token_id != Some(i as u32))
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

fn draw(token_logits: &[TokenLogit], seed: u64) -> u32 {
    if token_logits.is_empty() {
        return 0;
    }
    let max = token_logits.iter().map(|t| t.logit).fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = token_logits.iter().map(|t| (t.logit - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    let probs: Vec<f32> = exps.iter().map(|e| e / sum).collect();

    let mut rng = StdRng::seed_from_u64(seed);
    match WeightedIndex::new(&probs) {
        Ok(dist) => token_logits[dist.sample(&mut rng)].token_id,
        Err(_) => token_logits[0].token_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_greedy_threshold_is_argmax() {
        let opts = SamplingOptions { temperature: 0.01, greedy_threshold: 0.05, ..SamplingOptions::default() };
        let logits = vec![1.0, 5.0, 2.0];
        assert_eq!(sample(&logits, &[], &opts, 0, None), 1);
    }

    #[test]
    fn test_argmax_ignores_pad_token() {
        let logits = vec![1.0, 9.0, 2.0];
        assert_eq!(argmax(&logits, Some(1)), 2);
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let opts = SamplingOptions { temperature: 1.0, top_k: 5, top_p: 1.0, repetition_penalty: 1.0, greedy_threshold: 0.05 };
        let logits = vec![0.1, 0.2, 5.0, 0.3, 0.4, 0.05, 0.6];
        let a = sample(&logits, &[], &opts, 42, None);
        let b = sample(&logits, &[], &opts, 42, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_top_k_one_matches_argmax() {
        let opts = SamplingOptions { temperature: 1.0, top_k: 1, top_p: 1.0, repetition_penalty: 1.0, greedy_threshold: 0.0 };
        let logits = vec![0.1, 0.2, 5.0, 0.3];
        assert_eq!(sample(&logits, &[], &opts, 7, None), 2);
    }

    #[test]
    fn test_repetition_penalty_one_is_noop() {
        let opts = SamplingOptions { temperature: 0.01, top_k: 0, top_p: 1.0, repetition_penalty: 1.0, greedy_threshold: 0.05 };
        let logits = vec![1.0, 5.0, 2.0];
        assert_eq!(sample(&logits, &[1], &opts, 0, None), 1);
    }
}
