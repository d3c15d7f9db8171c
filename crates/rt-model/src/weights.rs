use rt_tensor::{GpuContext, Result, WeightEntry, WeightLayout, WeightRegistry};

use crate::config::ModelConfig;
use crate::manifest::ManifestSource;

/// Per-layer weight handles, named the way the canonical plan in §4.2
/// references them. `qkv_fused` is populated instead of `wq`/`wk`/`wv`
/// when the manifest has a pre-fused projection and the runtime permits
/// fusion.
pub struct LayerWeights {
    pub attn_norm: String,
    pub qkv_fused: Option<String>,
    pub wq: Option<String>,
    pub wk: Option<String>,
    pub wv: Option<String>,
    pub wo: String,
    pub post_attn_norm: Option<String>,
    pub ffn_norm: String,
    pub post_ffn_norm: Option<String>,
    pub ffn_gate_up: Option<String>,
    pub ffn_gate: Option<String>,
    pub ffn_up: Option<String>,
    pub ffn_down: String,
    pub router: Option<String>,
    pub experts: Vec<ExpertWeightNames>,
}

/// Per-expert weight names for a MoE layer.
pub struct ExpertWeightNames {
    pub gate: String,
    pub up: String,
    pub down: String,
}

/// All GPU-resident weights for a loaded model, keyed into the shared
/// `WeightRegistry` by manifest tensor name; this struct only remembers
/// which names to look up for each logical role.
pub struct ModelWeights {
    pub registry: WeightRegistry,
    pub token_embd: String,
    pub output_norm: String,
    pub output: String,
    pub layers: Vec<LayerWeights>,
}

impl ModelWeights {
    /// Uploads every tensor the manifest exposes for roles this plan
    /// needs, and records the per-layer name bindings `LayerEngine` walks
    /// during `run_layer`.
    pub fn load(context: &GpuContext, manifest: &dyn ManifestSource, config: &ModelConfig) -> Result<Self> {
        let mut registry = WeightRegistry::new();

        upload(context, &mut registry, manifest, "token_embd.weight");
        upload(context, &mut registry, manifest, "output_norm.weight");
        let output = if manifest.tensor_bytes("output.weight").is_some() {
            upload(context, &mut registry, manifest, "output.weight");
            "output.weight".to_string()
        } else {
            "token_embd.weight".to_string()
        };

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let fused_name = format!("blk.{i}.attn_qkv.weight");
            let qkv_fused = if manifest.has_fused_qkv(i) {
                upload(context, &mut registry, manifest, &fused_name);
                Some(fused_name)
            } else {
                None
            };
            let (wq, wk, wv) = if qkv_fused.is_none() {
                let wq = format!("blk.{i}.attn_q.weight");
                let wk = format!("blk.{i}.attn_k.weight");
                let wv = format!("blk.{i}.attn_v.weight");
                upload(context, &mut registry, manifest, &wq);
                upload(context, &mut registry, manifest, &wk);
                upload(context, &mut registry, manifest, &wv);
                (Some(wq), Some(wk), Some(wv))
            } else {
                (None, None, None)
            };

            let post_attn_name = format!("blk.{i}.post_attention_norm.weight");
            let post_attn_norm = if manifest.tensor_bytes(&post_attn_name).is_some() {
                upload(context, &mut registry, manifest, &post_attn_name);
                Some(post_attn_name)
            } else {
                None
            };

            let router_name = format!("blk.{i}.ffn_gate_inp.weight");
            let router = if config.moe.is_some() && manifest.tensor_bytes(&router_name).is_some() {
                upload(context, &mut registry, manifest, &router_name);
                Some(router_name)
            } else {
                None
            };

            let mut experts = Vec::new();
            if let Some(moe) = &config.moe {
                for e in 0..moe.num_experts {
                    let down = format!("blk.{i}.ffn_down.{e}.weight");
                    if manifest.tensor_bytes(&down).is_some() {
                        let gate = format!("blk.{i}.ffn_gate.{e}.weight");
                        let up = format!("blk.{i}.ffn_up.{e}.weight");
                        upload(context, &mut registry, manifest, &gate);
                        upload(context, &mut registry, manifest, &up);
                        upload(context, &mut registry, manifest, &down);
                        experts.push(ExpertWeightNames { gate, up, down });
                    }
                }
            }

            let fused_up_name = format!("blk.{i}.ffn_gate_up.weight");
            let (ffn_gate_up, ffn_gate, ffn_up) = if manifest.tensor_bytes(&fused_up_name).is_some() {
                upload(context, &mut registry, manifest, &fused_up_name);
                (Some(fused_up_name), None, None)
            } else {
                let g = format!("blk.{i}.ffn_gate.weight");
                let u = format!("blk.{i}.ffn_up.weight");
                upload(context, &mut registry, manifest, &g);
                upload(context, &mut registry, manifest, &u);
                (None, Some(g), Some(u))
            };

            let wo = format!("blk.{i}.attn_output.weight");
            let ffn_norm = format!("blk.{i}.ffn_norm.weight");
            let ffn_down = format!("blk.{i}.ffn_down.weight");
            upload(context, &mut registry, manifest, &wo);
            upload(context, &mut registry, manifest, &ffn_norm);
            if experts.is_empty() {
                upload(context, &mut registry, manifest, &ffn_down);
            }

            let post_ffn_name = format!("blk.{i}.post_ffw_norm.weight");
            let post_ffn_norm = if manifest.tensor_bytes(&post_ffn_name).is_some() {
                upload(context, &mut registry, manifest, &post_ffn_name);
                Some(post_ffn_name)
            } else {
                None
            };

            layers.push(LayerWeights {
                attn_norm: format!("blk.{i}.attn_norm.weight"),
                qkv_fused,
                wq,
                wk,
                wv,
                wo,
                post_attn_norm,
                ffn_norm,
                post_ffn_norm,
                ffn_gate_up,
                ffn_gate,
                ffn_up,
                ffn_down,
                router,
                experts,
            });
            upload(context, &mut registry, manifest, &layers.last().unwrap().attn_norm);
        }

        Ok(Self { registry, token_embd: "token_embd.weight".to_string(), output_norm: "output_norm.weight".to_string(), output, layers })
    }

    pub fn get(&self, name: &str) -> Option<&WeightEntry> {
        self.registry.get(name)
    }
}

fn upload(context: &GpuContext, registry: &mut WeightRegistry, manifest: &dyn ManifestSource, name: &str) {
    if registry.contains(name) {
        return;
    }
    let Some(bytes) = manifest.tensor_bytes(name) else { return };
    let desc = manifest.weight_descriptor(name).unwrap_or(crate::manifest::WeightDescriptor {
        dtype: rt_tensor::DType::F32,
        layout: WeightLayout::Row,
    });
    let elems = bytes.len() / desc.dtype.size_in_bytes().max(1);
    registry.insert(context, name, bytes, desc.dtype, desc.layout, rt_tensor::Shape::new(vec![elems]), None);
}
