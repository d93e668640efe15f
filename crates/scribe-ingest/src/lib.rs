pub mod engine;
pub mod error;
pub mod governor;
pub mod resume;
#[cfg(test)]
pub(crate) mod testutil;

pub use engine::IngestionEngine;
pub use error::{IngestError, Result};
pub use governor::RateGovernor;
pub use resume::{IndexStatus, ResumptionStore};
