use rt_tensor::FinitenessPolicy;

use crate::config::{ActivationDType, ModelConfig, RuntimeConfig};

/// One complete, compiled set of decisions a session runs under: which
/// activation dtype every kernel dispatch uses, which kernel variant set
/// to select weights from, and the finiteness policy governing whether
/// this plan can trigger a fallback of its own.
#[derive(Debug, Clone)]
pub struct Plan {
    pub activation_dtype: ActivationDType,
    pub kernel_path: String,
    pub finiteness: FinitenessPolicy,
}

/// Primary plus an optional fallback, compiled once at `loadModel` time
/// from the model's fixed config and the session's mutable runtime
/// config. A fallback only exists when the primary could actually trigger
/// one — f16 activations with the finiteness guard enabled.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub primary: Plan,
    pub fallback: Option<Plan>,
}

impl ExecutionPlan {
    /// Compiles the plan pair. `fallback` upgrades activations to f32 and
    /// keeps the same kernel path unless the model's own config already
    /// forces f32 (in which case there is nothing weaker to fall back
    /// from, so no fallback plan is built at all).
    pub fn compile(_model: &ModelConfig, runtime: &RuntimeConfig) -> Self {
        let primary = Plan {
            activation_dtype: runtime.activation_dtype,
            kernel_path: runtime.kernel_path.clone(),
            finiteness: runtime.finiteness,
        };

        let fallback = if primary.activation_dtype == ActivationDType::F16 && primary.finiteness.enabled {
            Some(Plan {
                activation_dtype: ActivationDType::F32,
                kernel_path: runtime.kernel_path.clone(),
                finiteness: primary.finiteness,
            })
        } else {
            None
        };

        Self { primary, fallback }
    }
}

/// The session-level state machine a driver walks as the finiteness guard
/// fires. `Primary` is the only state a session starts in; once it leaves
/// `Primary` it never returns (a second excursion from `Fallback` is
/// fatal, not a retry loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Primary,
    Fallback,
    Error,
}

/// Drives `PlanState` transitions and hands back which `Plan` is active.
/// Holds no GPU resources itself — callers re-derive buffers/bind groups
/// for the new plan's activation dtype after a transition.
pub struct PlanSession {
    plan: ExecutionPlan,
    state: PlanState,
}

impl PlanSession {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self { plan, state: PlanState::Primary }
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn active(&self) -> &Plan {
        match self.state {
            PlanState::Primary | PlanState::Error => &self.plan.primary,
            PlanState::Fallback => self.plan.fallback.as_ref().unwrap_or(&self.plan.primary),
        }
    }

    /// Called when the finiteness guard reports a triggered excursion for
    /// the step just submitted. Returns the new state; the caller is
    /// responsible for rewinding sequence length and releasing any pages
    /// acquired past the pre-batch length before retrying.
    pub fn on_finiteness_triggered(&mut self) -> PlanState {
        self.state = match self.state {
            PlanState::Primary if self.plan.fallback.is_some() => PlanState::Fallback,
            PlanState::Primary | PlanState::Fallback | PlanState::Error => PlanState::Error,
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchingConfig, KvDType, KvLayoutKind, SamplingDefaults};

    fn runtime(activation: ActivationDType, finiteness_enabled: bool) -> RuntimeConfig {
        RuntimeConfig {
            activation_dtype: activation,
            kv_dtype: KvDType::F16,
            kv_layout: KvLayoutKind::Contiguous,
            batching: BatchingConfig::default(),
            sampling: SamplingDefaults::default(),
            finiteness: FinitenessPolicy { enabled: finiteness_enabled, include_non_finite: true, abs_threshold: 65500.0 },
            kernel_path: "default".to_string(),
        }
    }

    fn model() -> ModelConfig {
        ModelConfig {
            num_layers: 2,
            hidden_size: 8,
            num_heads: 2,
            num_kv_heads: 2,
            head_dim: 4,
            vocab_size: 32,
            max_seq_len: 128,
            rms_norm_eps: 1e-5,
            rms_norm_weight_offset: false,
            rope_theta: 10000.0,
            rope_local_theta: None,
            rope_scaling: None,
            sliding_window: None,
            final_logit_softcapping: None,
            attn_logit_softcapping: None,
            moe: None,
            scale_embeddings: false,
            tied_embeddings: false,
            chat_template_type: crate::config::ChatTemplateType::ChatMl,
        }
    }

    #[test]
    fn test_f16_with_guard_gets_f32_fallback() {
        let plan = ExecutionPlan::compile(&model(), &runtime(ActivationDType::F16, true));
        let fallback = plan.fallback.expect("f16 primary with finiteness enabled must compile a fallback");
        assert_eq!(fallback.activation_dtype, ActivationDType::F32);
    }

    #[test]
    fn test_f32_primary_has_no_fallback() {
        let plan = ExecutionPlan::compile(&model(), &runtime(ActivationDType::F32, true));
        assert!(plan.fallback.is_none());
    }

    #[test]
    fn test_guard_disabled_has_no_fallback() {
        let plan = ExecutionPlan::compile(&model(), &runtime(ActivationDType::F16, false));
        assert!(plan.fallback.is_none());
    }

    #[test]
    fn test_primary_to_fallback_is_one_way() {
        let plan = ExecutionPlan::compile(&model(), &runtime(ActivationDType::F16, true));
        let mut session = PlanSession::new(plan);
        assert_eq!(session.state(), PlanState::Primary);
        assert_eq!(session.on_finiteness_triggered(), PlanState::Fallback);
        assert_eq!(session.on_finiteness_triggered(), PlanState::Error);
    }

    #[test]
    fn test_triggered_with_no_fallback_goes_straight_to_error() {
        let plan = ExecutionPlan::compile(&model(), &runtime(ActivationDType::F32, true));
        let mut session = PlanSession::new(plan);
        assert_eq!(session.on_finiteness_triggered(), PlanState::Error);
    }
}
