use std::time::Duration;

/// Per-call timing/throughput counters, reset at the start of each
/// `generate()` and readable via `Driver::get_stats` afterward.
#[derive(Debug, Clone, Default)]
pub struct GenerationStats {
    pub prefill_time_ms: f64,
    pub decode_time_ms: f64,
    pub ttft_ms: f64,
    pub tokens_generated: usize,
    pub decode_profile_steps: Vec<f64>,
}

impl GenerationStats {
    pub fn record_prefill(&mut self, d: Duration) {
        self.prefill_time_ms = d.as_secs_f64() * 1000.0;
    }

    pub fn record_ttft(&mut self, d: Duration) {
        self.ttft_ms = d.as_secs_f64() * 1000.0;
    }

    pub fn record_decode_step(&mut self, d: Duration) {
        let ms = d.as_secs_f64() * 1000.0;
        self.decode_time_ms += ms;
        self.decode_profile_steps.push(ms);
        self.tokens_generated += 1;
    }
}
