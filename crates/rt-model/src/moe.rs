use std::collections::HashMap;

use rt_tensor::kernels::{activation, elementwise, gather, matmul, KernelLibrary};
use rt_tensor::{DType, Result, Shape, Tensor};

use crate::config::{ExpertFormat, MoeConfig};
use crate::weights::{LayerWeights, ModelWeights};

/// Mixture-of-experts FFN for one layer. Unlike the rest of the layer's
/// steps, this one does not append to the caller's command recorder:
/// picking which experts run requires a host-side readback of the router
/// logits, and combining each expert's contribution back into per-token
/// rows is done on the host too, so the whole block manages its own
/// submissions and hands back a single ordinary (pool-owned) tensor.
pub fn run_moe(lib: &KernelLibrary, weights: &ModelWeights, layer: &LayerWeights, moe: &MoeConfig, x: &Tensor, hidden_size: usize) -> Result<Tensor> {
    let router_name = layer.router.as_ref().expect("moe layer missing router weight");
    let router_w = weights.get(router_name).expect("router weight not uploaded in registry");

    let router_logits = matmul::matmul(lib, x, router_w)?;
    let n_tokens = x.shape().dim(0);
    let num_experts = moe.num_experts;
    let logits: Vec<f32> = router_logits.read_to_vec()?;

    let mut assignments: HashMap<usize, Vec<(u32, f32)>> = HashMap::new();
    for t in 0..n_tokens {
        let row = &logits[t * num_experts..(t + 1) * num_experts];
        for (expert, weight) in route_row(row, moe) {
            assignments.entry(expert).or_default().push((t as u32, weight));
        }
    }

    let mut combined = vec![0.0f32; n_tokens * hidden_size];

    for (expert_idx, rows) in assignments {
        let expert = layer.experts.get(expert_idx).expect("router selected an expert with no uploaded weights");
        let gate_w = weights.get(&expert.gate).expect("expert gate weight missing from registry");
        let up_w = weights.get(&expert.up).expect("expert up weight missing from registry");
        let down_w = weights.get(&expert.down).expect("expert down weight missing from registry");

        let token_ids: Vec<u32> = rows.iter().map(|(t, _)| *t).collect();
        let indices = upload_indices(lib, &token_ids);
        let sub = gather::gather(lib, &indices, x.buffer(), hidden_size as u32, n_tokens as u32, false)?;

        let gate = matmul::matmul(lib, &sub, gate_w)?;
        let up = matmul::matmul(lib, &sub, up_w)?;
        let act = activation::silu(lib, &gate)?;
        let hidden = elementwise::mul(lib, &act, &up)?;
        let expert_out = matmul::matmul(lib, &hidden, down_w)?;

        let out_rows: Vec<f32> = expert_out.read_to_vec()?;
        for (local_row, (token, weight)) in rows.iter().enumerate() {
            let dst = *token as usize * hidden_size;
            let src = local_row * hidden_size;
            for d in 0..hidden_size {
                combined[dst + d] += out_rows[src + d] * weight;
            }
        }
    }

    let bytes = (n_tokens * hidden_size * 4) as u64;
    let pooled = lib.pool().acquire(bytes, "moe combined output")?;
    lib.context().queue.write_buffer(pooled.buffer(), 0, bytemuck::cast_slice(&combined));
    Ok(Tensor::from_pooled(lib.context().clone(), pooled, Shape::new(vec![n_tokens, hidden_size]), DType::F32))
}

fn route_row(row: &[f32], moe: &MoeConfig) -> Vec<(usize, f32)> {
    let k = moe.top_k.min(row.len());
    match moe.expert_format {
        ExpertFormat::Dense | ExpertFormat::Mixtral => {
            let probs = softmax(row);
            let mut idx: Vec<usize> = (0..probs.len()).collect();
            idx.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap());
            let mut picks: Vec<(usize, f32)> = idx.into_iter().take(k).map(|i| (i, probs[i])).collect();
            if matches!(moe.expert_format, ExpertFormat::Mixtral) {
                let sum: f32 = picks.iter().map(|(_, w)| *w).sum();
                if sum > 0.0 {
                    for (_, w) in picks.iter_mut() {
                        *w /= sum;
                    }
                }
            }
            picks
        }
        ExpertFormat::GptOss => {
            let gates: Vec<f32> = row.iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect();
            let mut idx: Vec<usize> = (0..gates.len()).collect();
            idx.sort_by(|&a, &b| gates[b].partial_cmp(&gates[a]).unwrap());
            idx.into_iter().take(k).map(|i| (i, gates[i])).collect()
        }
    }
}

fn softmax(row: &[f32]) -> Vec<f32> {
    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// `DType::F32` here is a placeholder label, not a meaningful dtype — the
/// gather kernel only ever reads this tensor's element count and raw
/// buffer, treating the bytes as a `u32` index array.
fn upload_indices(lib: &KernelLibrary, indices: &[u32]) -> Tensor {
    use wgpu::util::DeviceExt;
    let buf = lib.context().device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("moe expert token indices"),
        contents: bytemuck::cast_slice(indices),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    });
    Tensor::from_recorded(lib.context().clone(), std::sync::Arc::new(buf), Shape::new(vec![indices.len()]), DType::F32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixtral_route_renormalizes_selected_weights() {
        let moe = MoeConfig { num_experts: 4, top_k: 2, expert_format: ExpertFormat::Mixtral };
        let picks = route_row(&[1.0, 5.0, 0.1, 0.1], &moe);
        let sum: f32 = picks.iter().map(|(_, w)| w).sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(picks.len(), 2);
    }

    #[test]
    fn test_gptoss_route_does_not_renormalize() {
        let moe = MoeConfig { num_experts: 4, top_k: 2, expert_format: ExpertFormat::GptOss };
        let picks = route_row(&[10.0, 10.0, -10.0, -10.0], &moe);
        let sum: f32 = picks.iter().map(|(_, w)| w).sum();
        assert!(sum < 1.5);
    }
}
