use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::context::GpuContext;
use crate::dtype::DType;
use crate::shape::Shape;

/// Row-major or column-major storage of a weight matrix. Matmul consults
/// this to decide whether `transposeB` should default to true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightLayout {
    Row,
    Column,
}

/// Quantization metadata attached to a Q4_K weight. Block-relative scale
/// and min are stored inline in the tensor's bytes per the k-quant block
/// layout; this only records the parameters the matmul shader needs to
/// index into that layout.
#[derive(Debug, Clone, Copy)]
pub struct QuantMeta {
    pub block_size: usize,
    pub super_block_size: usize,
}

/// A weight matrix resident on the GPU for the lifetime of the loaded
/// model. Unlike activation tensors, weight entries are never acquired
/// from the buffer pool and are shared by reference across every
/// invocation of the layer that owns them.
pub struct WeightEntry {
    buffer: Arc<wgpu::Buffer>,
    dtype: DType,
    layout: WeightLayout,
    shape: Shape,
    quant: Option<QuantMeta>,
}

impl WeightEntry {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> WeightLayout {
        self.layout
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn quant(&self) -> Option<QuantMeta> {
        self.quant
    }
}

/// Registry of all weight entries for a loaded model, keyed by the
/// manifest's tensor name (e.g. `blk.3.attn_q.weight`).
///
/// Populated once at load time from host-resident bytes the (out-of-scope)
/// model loader hands over; never mutated afterward.
pub struct WeightRegistry {
    entries: HashMap<String, WeightEntry>,
}

impl WeightRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Upload raw host bytes as a named weight entry. `bytes` must already
    /// be in the on-device layout for `dtype` (dequantization, if any, is
    /// the loader's responsibility before this call).
    pub fn insert(
        &mut self,
        context: &GpuContext,
        name: impl Into<String>,
        bytes: &[u8],
        dtype: DType,
        layout: WeightLayout,
        shape: Shape,
        quant: Option<QuantMeta>,
    ) {
        let name = name.into();
        let buffer = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&name),
                contents: bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            });
        self.entries.insert(
            name,
            WeightEntry {
                buffer: Arc::new(buffer),
                dtype,
                layout,
                shape,
                quant,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&WeightEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for WeightRegistry {
    fn default() -> Self {
        Self::new()
    }
}
