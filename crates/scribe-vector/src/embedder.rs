use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use scribe_model::runtime::{ModelRuntime, RuntimeError};

/// A named embedding function over the model runtime.
pub struct Embedder {
    model: String,
    runtime: Arc<dyn ModelRuntime>,
}

impl Embedder {
    pub fn new(model: impl Into<String>, runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            model: model.into(),
            runtime,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a batch of documents, one vector per document, in order.
    pub async fn embed(&self, documents: &[String]) -> Result<Vec<Vec<f32>>, RuntimeError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        self.runtime.embed(&self.model, documents).await
    }
}

/// Named embedder cache: constructs on first use, reuses thereafter.
///
/// At most one live [`Embedder`] exists per model name; concurrent first
/// requests race on construction but only one instance is retained.
pub struct EmbedderRegistry {
    runtime: Arc<dyn ModelRuntime>,
    cache: DashMap<String, Arc<Embedder>>,
}

impl EmbedderRegistry {
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            cache: DashMap::new(),
        }
    }

    /// Fetch or construct the embedder for `name`.
    ///
    /// Construction loads the model; failures surface so callers can fall
    /// back to the default model.
    pub async fn get(&self, name: &str) -> Result<Arc<Embedder>, RuntimeError> {
        if let Some(existing) = self.cache.get(name) {
            return Ok(Arc::clone(&existing));
        }

        debug!(model = name, "constructing embedder");
        self.runtime.ensure_available(name).await?;

        // Re-check after the await: another task may have won the race.
        let embedder = self
            .cache
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Embedder::new(name, Arc::clone(&self.runtime))))
            .clone();
        Ok(embedder)
    }

    /// Eagerly construct an embedder at startup so the first ingest batch
    /// does not pay the model-load latency.
    pub async fn preload(&self, name: &str) -> Result<(), RuntimeError> {
        self.get(name).await?;
        info!(model = name, "embedder preloaded");
        Ok(())
    }
}
