use rt_tensor::{GpuContext, Result};

use crate::config::{ModelConfig, RopeScaling};

/// Precomputed `cos`/`sin` tables for rotary embeddings, one pair per
/// frequency base (global, and local when the model uses dual RoPE for
/// sliding-window layers). Computed once at `loadModel` time and uploaded
/// as plain storage buffers the `rope` kernel indexes by absolute position.
pub struct RopeTables {
    pub global_cos: wgpu::Buffer,
    pub global_sin: wgpu::Buffer,
    pub local: Option<(wgpu::Buffer, wgpu::Buffer)>,
}

impl RopeTables {
    pub fn build(context: &GpuContext, config: &ModelConfig) -> Result<Self> {
        let half = config.head_dim / 2;
        let (cos, sin) = frequency_table(config.max_seq_len, half, config.rope_theta, config.rope_scaling);
        let global_cos = upload(context, &cos, "rope cos (global)");
        let global_sin = upload(context, &sin, "rope sin (global)");

        let local = config.rope_local_theta.map(|theta| {
            let (lc, ls) = frequency_table(config.max_seq_len, half, theta, None);
            (upload(context, &lc, "rope cos (local)"), upload(context, &ls, "rope sin (local)"))
        });

        Ok(Self { global_cos, global_sin, local })
    }

    pub fn for_layer(&self, local: bool) -> (&wgpu::Buffer, &wgpu::Buffer) {
        if local {
            if let Some((c, s)) = &self.local {
                return (c, s);
            }
        }
        (&self.global_cos, &self.global_sin)
    }
}

fn upload(context: &GpuContext, data: &[f32], label: &str) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(data),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    })
}

/// `cos[pos, i] = cos(pos / theta_eff^(2i/dim))`, `theta_eff` adjusted for
/// YARN's per-frequency interpolation between the original and scaled
/// wavelength when configured.
fn frequency_table(max_pos: usize, half_dim: usize, theta: f32, scaling: Option<RopeScaling>) -> (Vec<f32>, Vec<f32>) {
    let dim = half_dim * 2;
    let mut cos = vec![0.0f32; max_pos * half_dim];
    let mut sin = vec![0.0f32; max_pos * half_dim];

    let freqs: Vec<f32> = (0..half_dim)
        .map(|i| 1.0 / theta.powf((2 * i) as f32 / dim as f32))
        .collect();

    let freqs = match scaling {
        Some(RopeScaling::Linear { factor }) => freqs.iter().map(|f| f / factor).collect(),
        Some(RopeScaling::Yarn { factor, beta_fast, beta_slow, original_max_pos }) => {
            yarn_adjust(&freqs, factor, beta_fast, beta_slow, original_max_pos, dim, theta)
        }
        None => freqs,
    };

    for pos in 0..max_pos {
        for (i, f) in freqs.iter().enumerate() {
            let angle = pos as f32 * f;
            cos[pos * half_dim + i] = angle.cos();
            sin[pos * half_dim + i] = angle.sin();
        }
    }
    (cos, sin)
}

/// YARN per-dimension interpolation between the unscaled and
/// linearly-scaled frequency, ramped between a "fast" and "slow"
/// wavelength boundary expressed in rotations.
fn yarn_adjust(freqs: &[f32], factor: f32, beta_fast: f32, beta_slow: f32, original_max_pos: usize, dim: usize, theta: f32) -> Vec<f32> {
    let find_correction_dim = |num_rotations: f32| -> f32 {
        (dim as f32 * (original_max_pos as f32 / (num_rotations * 2.0 * std::f32::consts::PI)).ln()) / (2.0 * theta.ln())
    };
    let low = find_correction_dim(beta_fast).floor().max(0.0);
    let high = find_correction_dim(beta_slow).ceil().min((dim / 2 - 1) as f32);

    freqs
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let ramp = if high == low { 0.0 } else { ((i as f32 - low) / (high - low)).clamp(0.0, 1.0) };
            let extrapolation = *f;
            let interpolation = *f / factor;
            interpolation * (1.0 - ramp) + extrapolation * ramp
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_table_shape_and_identity_at_pos_zero() {
        let (cos, sin) = frequency_table(4, 2, 10000.0, None);
        assert_eq!(cos.len(), 8);
        assert_eq!(sin.len(), 8);
        assert!((cos[0] - 1.0).abs() < 1e-6);
        assert!(sin[0].abs() < 1e-6);
    }

    #[test]
    fn test_linear_scaling_lowers_frequency() {
        let (unscaled, _) = frequency_table(2, 2, 10000.0, None);
        let (scaled, _) = frequency_table(2, 2, 10000.0, Some(RopeScaling::Linear { factor: 2.0 }));
        assert!(scaled[1 * 2 + 1].abs() <= unscaled[1 * 2 + 1].abs() + 1e-6);
    }
}
