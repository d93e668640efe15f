use thiserror::Error;

/// Top-level error kinds shared across the workspace.
///
/// Subsystem crates define their own narrow enums and convert into this at
/// the boundary where a caller needs the coarse classification (e.g. the
/// bot's command replies, the pipeline's skip/stop switch).
#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Request already active for user {user_id} (position {position})")]
    AlreadyActive { user_id: String, position: usize },

    #[error("Failure policy stop: {0}")]
    PolicyStop(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScribeError {
    /// Short code string used in logs and status replies.
    pub fn code(&self) -> &'static str {
        match self {
            ScribeError::Config(_) => "CONFIG_ERROR",
            ScribeError::RateLimited { .. } => "RATE_LIMITED",
            ScribeError::NotFound(_) => "NOT_FOUND",
            ScribeError::Forbidden(_) => "FORBIDDEN",
            ScribeError::Transport(_) => "TRANSPORT_ERROR",
            ScribeError::Timeout { .. } => "TIMEOUT",
            ScribeError::Parse(_) => "PARSE_ERROR",
            ScribeError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            ScribeError::Storage(_) => "STORAGE_ERROR",
            ScribeError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            ScribeError::AlreadyActive { .. } => "ALREADY_ACTIVE",
            ScribeError::PolicyStop(_) => "POLICY_STOP",
            ScribeError::Serialization(_) => "SERIALIZATION_ERROR",
            ScribeError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScribeError>;
