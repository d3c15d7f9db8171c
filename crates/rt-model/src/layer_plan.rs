use std::collections::HashSet;

use crate::error::{ModelError, Result};

/// Named intermediate values a transformer layer's canonical control flow
/// passes between steps. Used only to describe and validate step
/// ordering — `LayerEngine` executes the actual kernels directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Input,
    AttnNormed,
    Qkv,
    Rotated,
    AttnOut,
    AttnProj,
    Resid1,
    FfnNormed,
    FfnOut,
    Resid2,
}

#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub name: &'static str,
    pub reads: &'static [Slot],
    pub writes: Slot,
}

/// The layer control flow every architecture this engine supports shares:
/// pre-norm attention block, then pre-norm FFN block, both residual.
/// Per-model variation (fused vs. split QKV, sandwich norms, dense vs.
/// MoE FFN) happens inside a step's kernel calls, not in this ordering.
pub const CANONICAL_PLAN: &[Step] = &[
    Step { name: "attn_norm", reads: &[Slot::Input], writes: Slot::AttnNormed },
    Step { name: "qkv_proj", reads: &[Slot::AttnNormed], writes: Slot::Qkv },
    Step { name: "rope", reads: &[Slot::Qkv], writes: Slot::Rotated },
    Step { name: "attention", reads: &[Slot::Rotated], writes: Slot::AttnOut },
    Step { name: "out_proj", reads: &[Slot::AttnOut], writes: Slot::AttnProj },
    Step { name: "residual_attn", reads: &[Slot::Input, Slot::AttnProj], writes: Slot::Resid1 },
    Step { name: "ffn_norm", reads: &[Slot::Resid1], writes: Slot::FfnNormed },
    Step { name: "ffn", reads: &[Slot::FfnNormed], writes: Slot::FfnOut },
    Step { name: "residual_ffn", reads: &[Slot::Resid1, Slot::FfnOut], writes: Slot::Resid2 },
];

/// Checks that no step reads a slot before some earlier step (or the
/// initial input) has written it. Catches a plan that was reordered
/// incorrectly before it ever reaches the GPU.
pub fn validate(plan: &[Step]) -> Result<()> {
    let mut written = HashSet::new();
    written.insert(Slot::Input);
    for step in plan {
        for r in step.reads {
            if !written.contains(r) {
                return Err(ModelError::UnwrittenSlot(format!("{:?} read by '{}' before being written", r, step.name)));
            }
        }
        written.insert(step.writes);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_plan_is_well_ordered() {
        validate(CANONICAL_PLAN).expect("canonical plan must satisfy slot lifetimes");
    }

    #[test]
    fn test_reordered_plan_is_rejected() {
        let broken: &[Step] = &[
            Step { name: "ffn", reads: &[Slot::FfnNormed], writes: Slot::FfnOut },
            Step { name: "ffn_norm", reads: &[Slot::Resid1], writes: Slot::FfnNormed },
        ];
        assert!(validate(broken).is_err());
    }
}
