use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::context::GpuContext;
use crate::error::{Result, TensorError};

/// Rounds a byte size up to a size class so buffers of similar sizes can be
/// recycled instead of allocated fresh for every step. Size classes are
/// powers of two above 256 bytes.
fn size_class(bytes: u64) -> u64 {
    if bytes <= 256 {
        return 256;
    }
    bytes.next_power_of_two()
}

struct PoolEntry {
    free: Vec<Arc<wgpu::Buffer>>,
    active: usize,
}

/// Pool of GPU storage buffers keyed by size class.
///
/// Activations are short-lived: a buffer acquired for one decode step's
/// intermediate tensor is released back to the pool once the recorder that
/// produced it has been drained. Weight buffers never pass through the pool.
#[derive(Clone)]
pub struct BufferPool {
    context: GpuContext,
    usage: wgpu::BufferUsages,
    entries: Arc<Mutex<HashMap<u64, PoolEntry>>>,
}

impl BufferPool {
    pub fn new(context: GpuContext) -> Self {
        Self {
            context,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire a buffer able to hold at least `bytes` bytes. Reuses a freed
    /// buffer from the matching size class if one is available, otherwise
    /// allocates a new one.
    pub fn acquire(&self, bytes: u64, label: &str) -> Result<PooledBuffer> {
        let limit = self.context.max_storage_buffer_binding_size();
        if bytes > limit {
            return Err(TensorError::BufferTooLarge {
                requested: bytes,
                limit,
            });
        }
        let class = size_class(bytes);
        let mut guard = self.entries.lock().expect("buffer pool mutex poisoned");
        let entry = guard.entry(class).or_insert_with(|| PoolEntry {
            free: Vec::new(),
            active: 0,
        });

        let buffer = entry.free.pop().unwrap_or_else(|| {
            Arc::new(self.context.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: class,
                usage: self.usage,
                mapped_at_creation: false,
            }))
        });
        entry.active += 1;

        Ok(PooledBuffer {
            pool: self.entries.clone(),
            class,
            buffer: Some(buffer),
            len: bytes,
        })
    }

    /// Total bytes currently checked out across all size classes. Used by
    /// the accounting invariant test: this must return to its pre-call value
    /// once `generate()` returns.
    pub fn active_bytes(&self) -> u64 {
        let guard = self.entries.lock().expect("buffer pool mutex poisoned");
        guard
            .iter()
            .map(|(class, entry)| class * entry.active as u64)
            .sum()
    }
}

/// A buffer checked out of the pool. Returned to the pool's free list on
/// drop unless explicitly leaked via `into_inner` (used for weight uploads
/// that must outlive the pool's activity tracking).
pub struct PooledBuffer {
    pool: Arc<Mutex<HashMap<u64, PoolEntry>>>,
    class: u64,
    buffer: Option<Arc<wgpu::Buffer>>,
    len: u64,
}

impl PooledBuffer {
    pub fn buffer(&self) -> &wgpu::Buffer {
        self.buffer.as_ref().expect("pooled buffer already released")
    }

    pub fn arc(&self) -> Arc<wgpu::Buffer> {
        self.buffer.clone().expect("pooled buffer already released")
    }

    /// Logical length in bytes (may be smaller than the backing allocation's
    /// size class).
    pub fn len(&self) -> u64 {
        self.len
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            let mut guard = self.pool.lock().expect("buffer pool mutex poisoned");
            if let Some(entry) = guard.get_mut(&self.class) {
                entry.active = entry.active.saturating_sub(1);
                entry.free.push(buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_class_rounds_up() {
        assert_eq!(size_class(1), 256);
        assert_eq!(size_class(256), 256);
        assert_eq!(size_class(257), 512);
        assert_eq!(size_class(4096), 4096);
        assert_eq!(size_class(4097), 8192);
    }
}
