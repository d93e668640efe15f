use thiserror::Error;

use scribe_core::platform::PlatformError;
use scribe_core::ScribeError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("pipeline error: {0}")]
    Pipeline(#[source] ScribeError),

    #[error("ingest cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, IngestError>;
