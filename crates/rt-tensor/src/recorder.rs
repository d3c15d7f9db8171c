use std::sync::Arc;

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::context::GpuContext;

/// Accumulates compute passes into a single command encoder so a whole
/// decode step (or a batch of `B*K` decode steps) submits as one command
/// buffer instead of one submission per kernel call.
///
/// Transient output buffers produced by a kernel's recorded surface are
/// tracked here and released back to the pool once `submit()` returns,
/// mirroring the job lifecycle of a GPU-backed inference runtime: encode,
/// submit, await completion, release.
pub struct CommandRecorder {
    context: GpuContext,
    pool: BufferPool,
    encoder: Option<wgpu::CommandEncoder>,
    tracked: Vec<PooledBuffer>,
    timestamps: Option<TimestampProfiler>,
    pass_count: u32,
}

impl CommandRecorder {
    pub fn new(context: GpuContext, pool: BufferPool) -> Self {
        let encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rt-tensor recorder"),
            });
        Self {
            context,
            pool,
            encoder: Some(encoder),
            tracked: Vec::new(),
            timestamps: None,
            pass_count: 0,
        }
    }

    pub fn with_profiling(mut self) -> Self {
        self.timestamps = Some(TimestampProfiler::new());
        self
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn encoder_mut(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.as_mut().expect("recorder already submitted")
    }

    /// Take ownership of a pool-acquired buffer for the duration of this
    /// submission. Kernels call this for every output tensor they allocate
    /// on the recorded surface.
    pub fn track(&mut self, buffer: PooledBuffer) -> Arc<wgpu::Buffer> {
        let arc = buffer.arc();
        self.tracked.push(buffer);
        self.pass_count += 1;
        arc
    }

    pub fn pass_count(&self) -> u32 {
        self.pass_count
    }

    /// Submit the accumulated command buffer to the device queue and await
    /// completion. Tracked buffers are dropped (and so returned to the
    /// pool) only after this resolves, so no kernel downstream of this
    /// submission can observe a half-released buffer.
    pub async fn submit(mut self) {
        let encoder = self.encoder.take().expect("recorder already submitted");
        self.context.queue.submit(Some(encoder.finish()));
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        self.context.queue.on_submitted_work_done(move || {
            let _ = tx.send(());
        });
        self.context.device.poll(wgpu::Maintain::Wait);
        let _ = rx.receive().await;
        // `tracked` buffers drop here, returning to the pool.
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            tracing::warn!("CommandRecorder dropped without submit(); discarding recorded passes");
        }
    }
}

/// Optional GPU timestamp query wrapper for per-kernel profiling, enabled
/// only under a debug flag (never on the fused decode fast path).
pub struct TimestampProfiler {
    labels: Vec<String>,
}

impl TimestampProfiler {
    fn new() -> Self {
        Self { labels: Vec::new() }
    }

    pub fn mark(&mut self, label: impl Into<String>) {
        self.labels.push(label.into());
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
