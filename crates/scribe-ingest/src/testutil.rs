//! Shared stubs for this crate's tests.

use async_trait::async_trait;

use scribe_model::runtime::{ChatRequest, ChatResponse, ModelHealth, ModelRuntime, RuntimeError};

/// Embeds everything as a fixed vector; never fails.
pub(crate) struct StubRuntime;

#[async_trait]
impl ModelRuntime for StubRuntime {
    fn name(&self) -> &str {
        "stub"
    }

    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, RuntimeError> {
        unimplemented!("not used in ingest tests")
    }

    async fn describe_image(
        &self,
        _model: &str,
        _bytes: &[u8],
        _prompt: &str,
    ) -> Result<String, RuntimeError> {
        unimplemented!("not used in ingest tests")
    }

    async fn embed(
        &self,
        _model: &str,
        documents: &[String],
    ) -> Result<Vec<Vec<f32>>, RuntimeError> {
        Ok(documents.iter().map(|_| vec![0.5, 0.5]).collect())
    }

    async fn ensure_available(&self, _model: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn health_check(&self, model: &str) -> Result<ModelHealth, RuntimeError> {
        Ok(ModelHealth {
            model: model.to_string(),
            healthy: true,
            elapsed_ms: 0,
            detail: None,
        })
    }
}
