use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("embedding error: {0}")]
    Embedding(#[from] scribe_model::runtime::RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding dimension mismatch: collection is {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, VectorError>;
