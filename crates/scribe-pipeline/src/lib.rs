pub mod error;
pub mod extract;
pub mod normalize;
pub mod pipeline;
pub mod vision;
pub mod web;

pub use error::{PipelineError, Result};
pub use extract::{Extraction, Extractor};
pub use pipeline::Pipeline;
pub use vision::VisionDescriber;
pub use web::{HttpWebFetcher, WebError, WebFetcher};
