use thiserror::Error;

use scribe_core::ScribeError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(#[from] scribe_vector::VectorError),

    #[error("model error: {0}")]
    Model(#[from] scribe_model::runtime::RuntimeError),

    #[error("failure policy stop for server {server}: {source}")]
    PolicyStop {
        server: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl From<PipelineError> for ScribeError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Parse(msg) => ScribeError::Parse(msg),
            PipelineError::Storage(err) => ScribeError::Storage(err.to_string()),
            PipelineError::Model(err) => ScribeError::ModelUnavailable(err.to_string()),
            PipelineError::PolicyStop { server, source } => {
                ScribeError::PolicyStop(format!("server {server}: {source}"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
