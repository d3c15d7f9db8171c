use std::collections::HashMap;
use std::sync::Mutex;

use bytemuck::Pod;
use wgpu::util::DeviceExt;

use crate::buffer_pool::BufferPool;
use crate::context::GpuContext;
use crate::recorder::CommandRecorder;

/// Caches compiled compute pipelines by a stable key (kernel name plus any
/// dtype/role variant suffix), so repeated decode steps don't recompile
/// the same WGSL module every invocation.
pub struct KernelLibrary {
    context: GpuContext,
    pool: BufferPool,
    pipelines: Mutex<HashMap<&'static str, wgpu::ComputePipeline>>,
}

impl KernelLibrary {
    pub fn new(context: GpuContext, pool: BufferPool) -> Self {
        Self {
            context,
            pool,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Start a fresh command recorder drawing from this library's pool.
    pub fn recorder(&self) -> CommandRecorder {
        CommandRecorder::new(self.context.clone(), self.pool.clone())
    }

    /// Compile (or fetch cached) a single-entry-point compute pipeline from
    /// WGSL source.
    pub fn pipeline(&self, key: &'static str, source: &str, entry_point: &str) -> wgpu::ComputePipeline {
        let mut guard = self.pipelines.lock().expect("pipeline cache poisoned");
        if let Some(p) = guard.get(key) {
            return p.clone();
        }
        let module = self.context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(key),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = self
            .context
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(key),
                layout: None,
                module: &module,
                entry_point,
                compilation_options: Default::default(),
                cache: None,
            });
        guard.insert(key, pipeline.clone());
        pipeline
    }
}

/// Uploads a small POD struct as a uniform buffer; used for each kernel's
/// per-dispatch parameter block (dimensions, eps, scale, etc).
pub fn uniform_buffer<T: Pod>(context: &GpuContext, label: &str, data: &T) -> wgpu::Buffer {
    context
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(data),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
}

/// Number of workgroups needed to cover `n` invocations at the given
/// workgroup size.
pub fn workgroups_1d(n: u32, workgroup_size: u32) -> u32 {
    n.div_ceil(workgroup_size)
}

/// Builds a bind group for `pipeline`'s group 0 from a list of buffer
/// bindings in order, covering both storage buffers and uniform buffers
/// without requiring the caller to hand-write a `BindGroupLayout`.
pub fn bind_group(
    context: &GpuContext,
    pipeline: &wgpu::ComputePipeline,
    label: &str,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let layout = pipeline.get_bind_group_layout(0);
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(i, b)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: b.as_entire_binding(),
        })
        .collect();
    context.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &layout,
        entries: &entries,
    })
}
