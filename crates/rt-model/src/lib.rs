//! Transformer layer execution, KV cache layouts, and the execution-plan
//! compiler. Weight/manifest contracts and the kernel library itself live
//! in `rt-tensor`; this crate is where they get assembled into a
//! decoder-only forward pass.

pub mod config;
pub mod error;
pub mod execution_plan;
pub mod kv_cache;
pub mod layer_engine;
pub mod layer_plan;
pub mod logits;
pub mod manifest;
pub mod moe;
pub mod rope_table;
pub mod weights;

pub use error::{ModelError, Result};
pub use execution_plan::{ExecutionPlan, Plan, PlanSession, PlanState};
pub use layer_engine::{embed_tokens, LayerEngine};
pub use manifest::{AttentionKind, ManifestSource, WeightDescriptor};
pub use weights::ModelWeights;
