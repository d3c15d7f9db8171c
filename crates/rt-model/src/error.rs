use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("missing manifest field: {0}")]
    MissingField(String),
    #[error("invalid KV layout for this config: {0}")]
    InvalidLayout(String),
    #[error("invalid kernel path: {0}")]
    InvalidKernelPath(String),
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("layer plan reads slot '{0}' before it is written")]
    UnwrittenSlot(String),
    #[error("grouped-query attention requires numKVHeads | numHeads (got {num_heads}/{num_kv_heads})")]
    InvalidGqaRatio { num_heads: usize, num_kv_heads: usize },
    #[error("KV cache would exceed device storage binding limit: {requested} > {limit}")]
    BindingSizeExceeded { requested: u64, limit: u64 },
    #[error("tensor error: {0}")]
    Tensor(#[from] rt_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
