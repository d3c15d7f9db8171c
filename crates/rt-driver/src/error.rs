use thiserror::Error;

/// Errors surfaced by the generation driver. Configuration and device
/// errors are fatal at load; the rest can occur mid-generation, where
/// `generate()`'s stream simply ends with this as its last item.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Model(#[from] rt_model::ModelError),

    #[error(transparent)]
    Tensor(#[from] rt_tensor::TensorError),

    #[error("finiteness guard triggered and no further fallback is available")]
    FinitenessError,

    #[error("sampled token id {token} is out of range for vocab size {vocab_size}")]
    BadLogits { token: u32, vocab_size: usize },

    #[error("host readback is disabled by policy but this operation requires one")]
    ReadbackDisabled,

    #[error("generate() is already in progress for this session")]
    AlreadyGenerating,

    #[error("{0}")]
    Programmer(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
