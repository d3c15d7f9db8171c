use std::sync::Arc;

use bytemuck::Pod;

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::context::GpuContext;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// Ownership state of a GPU tensor's backing buffer.
///
/// A tensor owns its buffer exclusively. `Recorded` means a command
/// recorder currently holds it for the duration of one submission; the
/// tensor must not be read back or released by anyone else while in that
/// state. The recorder transitions it back to `Owned` once the batch has
/// been submitted and the recorder's tracking list is drained.
enum Backing {
    Owned(PooledBuffer),
    Recorded(Arc<wgpu::Buffer>),
}

/// A GPU-resident tensor: a buffer plus dtype and shape metadata.
///
/// Created via a kernel's immediate surface (which allocates from the
/// `BufferPool`) or handed in by a command recorder's recorded surface
/// (which tracks it for release after submission).
pub struct Tensor {
    context: GpuContext,
    backing: Backing,
    shape: Shape,
    dtype: DType,
}

impl Tensor {
    /// Wrap a pool-acquired buffer as a tensor. Used by kernel immediate
    /// surfaces once their output buffer has been allocated.
    pub fn from_pooled(context: GpuContext, buffer: PooledBuffer, shape: Shape, dtype: DType) -> Self {
        Self {
            context,
            backing: Backing::Owned(buffer),
            shape,
            dtype,
        }
    }

    /// Wrap a buffer owned by a command recorder. The recorder is
    /// responsible for releasing the underlying allocation after submission;
    /// this tensor may be read (bound into a pass) but not released twice.
    pub fn from_recorded(context: GpuContext, buffer: Arc<wgpu::Buffer>, shape: Shape, dtype: DType) -> Self {
        Self {
            context,
            backing: Backing::Recorded(buffer),
            shape,
            dtype,
        }
    }

    /// Allocate a zero-filled tensor of the given shape and dtype directly
    /// from a pool, without going through a kernel. Used for staging
    /// buffers (the decode ring, the finiteness status buffer).
    pub fn zeros(context: &GpuContext, pool: &BufferPool, shape: Shape, dtype: DType, label: &str) -> Result<Self> {
        let bytes = tensor_bytes(&shape, dtype);
        let pooled = pool.acquire(bytes, label)?;
        context.queue.write_buffer(pooled.buffer(), 0, &vec![0u8; bytes as usize]);
        Ok(Self::from_pooled(context.clone(), pooled, shape, dtype))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The device context this tensor's buffer lives on, for callers that
    /// need to issue their own copies or submissions against it (reshape
    /// helpers, column-split views).
    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn byte_len(&self) -> u64 {
        tensor_bytes(&self.shape, self.dtype)
    }

    /// Raw wgpu buffer, for binding into a compute pass.
    pub fn buffer(&self) -> &wgpu::Buffer {
        match &self.backing {
            Backing::Owned(p) => p.buffer(),
            Backing::Recorded(b) => b,
        }
    }

    /// True while a recorder holds this tensor's buffer for an in-flight
    /// submission; readback must wait until it returns to `Owned`.
    pub fn is_recorded(&self) -> bool {
        matches!(self.backing, Backing::Recorded(_))
    }

    /// Shared handle to the backing buffer, for in-place kernels (RoPE)
    /// that hand their input straight back out as their output.
    pub fn arc_buffer(&self) -> Arc<wgpu::Buffer> {
        match &self.backing {
            Backing::Owned(p) => p.arc(),
            Backing::Recorded(b) => b.clone(),
        }
    }

    /// Synchronously read the tensor back to the host. Only valid once the
    /// owning submission (if any) has completed; callers in the async
    /// driver should instead use `read_async`.
    pub fn read_to_vec<T: Pod + Default + Clone>(&self) -> Result<Vec<T>> {
        if self.is_recorded() {
            return Err(TensorError::OwnedByRecorder);
        }
        pollster::block_on(self.read_async())
    }

    /// Maps the buffer, awaits completion, and copies it into a host `Vec`.
    /// This is a driver suspension point (`mapAsync`).
    pub async fn read_async<T: Pod + Default + Clone>(&self) -> Result<Vec<T>> {
        let size = self.byte_len();
        let staging = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tensor readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(self.buffer(), 0, &staging, 0, size);
        self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.context.device.poll(wgpu::Maintain::Wait);
        rx.receive()
            .await
            .ok_or_else(|| TensorError::MapFailed("readback channel dropped".into()))?
            .map_err(|e| TensorError::MapFailed(e.to_string()))?;

        let data = slice.get_mapped_range();
        let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }
}

/// Byte length of a dense (non-quantized-block-straddling) tensor.
fn tensor_bytes(shape: &Shape, dtype: DType) -> u64 {
    let elems = shape.numel() as u64;
    match dtype {
        DType::Q4K => {
            let blocks = elems.div_ceil(dtype.block_size() as u64);
            blocks * dtype.size_in_bytes() as u64
        }
        _ => elems * dtype.size_in_bytes() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_bytes_dense() {
        let shape = Shape::new(vec![4, 8]);
        assert_eq!(tensor_bytes(&shape, DType::F32), 128);
        assert_eq!(tensor_bytes(&shape, DType::F16), 64);
    }

    #[test]
    fn test_tensor_bytes_quantized_rounds_up_to_block() {
        let shape = Shape::new(vec![300]);
        // 300 elements needs 2 blocks of 256.
        assert_eq!(tensor_bytes(&shape, DType::Q4K), 2 * 144);
    }
}
