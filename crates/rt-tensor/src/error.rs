use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: String, got: String },
    #[error("invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },
    #[error("cannot broadcast shapes {a:?} and {b:?}")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("no adapter matching the requested power preference was found")]
    NoAdapter,
    #[error("device request failed: {0}")]
    DeviceRequest(String),
    #[error("buffer of {requested} bytes exceeds device limit {limit}")]
    BufferTooLarge { requested: u64, limit: u64 },
    #[error("buffer pool has no free buffer of size class {0} and acquire_blocking was not set")]
    PoolExhausted(u64),
    #[error("tensor is still owned by a command recorder and cannot be read back")]
    OwnedByRecorder,
    #[error("map_async readback failed: {0}")]
    MapFailed(String),
    #[error("slot '{0}' was read before being written by an earlier step")]
    UnwrittenSlot(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
