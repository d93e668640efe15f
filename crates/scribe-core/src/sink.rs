//! Contract between ingestion and the processing pipeline.
//!
//! The completion signal travels as a one-shot channel passed into
//! `submit`, so the pipeline never holds a reference back to its caller;
//! ingestion applies backpressure by awaiting the signal before handing
//! over the next batch.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::ScribeError;
use crate::types::RawMessage;

/// Outcome counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records committed to a collection.
    pub stored: usize,
    /// Messages skipped as empty (counts as success).
    pub skipped: usize,
    /// Messages dropped (parse failure, unconfigured server, policy skip).
    pub dropped: usize,
}

/// Anything that accepts message batches for processing.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Process one batch and deliver the outcome on `done`.
    ///
    /// A `PolicyStop` error means the affected server's ingest must halt;
    /// other servers in the batch were still processed.
    async fn submit(
        &self,
        batch: Vec<RawMessage>,
        done: oneshot::Sender<Result<BatchReport, ScribeError>>,
    );
}
