use std::sync::Arc;

use crate::error::{Result, TensorError};

/// Owns the GPU device and queue for the lifetime of a loaded model.
///
/// Created once at model load and destroyed at unload; never a lazily
/// initialized global. All buffer pools, weight registries, and kernel
/// pipelines are constructed against a `GpuContext` and hold it by `Arc`.
#[derive(Debug, Clone)]
pub struct GpuContext {
    pub instance: Arc<wgpu::Instance>,
    pub adapter: Arc<wgpu::Adapter>,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Request a high-performance adapter and open a device with the
    /// limits the kernel library needs (storage buffers, compute shaders).
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(TensorError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("rt-tensor device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| TensorError::DeviceRequest(e.to_string()))?;

        tracing::info!(adapter = %adapter.get_info().name, backend = ?adapter.get_info().backend, "gpu context initialized");

        Ok(Self {
            instance: Arc::new(instance),
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Maximum bytes a single storage buffer binding may hold on this device.
    pub fn max_storage_buffer_binding_size(&self) -> u64 {
        self.device.limits().max_storage_buffer_binding_size as u64
    }

    /// Blocks the calling thread until all submitted GPU work completes.
    ///
    /// Used only in non-async contexts (tests, debug tooling); the driver's
    /// own suspension points use `queue.on_submitted_work_done` instead.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
