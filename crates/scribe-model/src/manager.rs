//! Joint lifecycle for the text and vision models.
//!
//! Startup warms both models and fails hard when either cannot be loaded;
//! there is no degraded mode. After warm-up the manager is immutable.

use std::sync::Arc;

use tracing::info;

use crate::runtime::{ModelHealth, ModelRuntime, RuntimeError};

/// Immutable handle to the warmed text + vision models.
pub struct ModelManager {
    runtime: Arc<dyn ModelRuntime>,
    text_model: String,
    vision_model: String,
}

/// Combined health snapshot from [`ModelManager::health_check_both`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelHealthReport {
    pub text: ModelHealth,
    pub vision: ModelHealth,
}

impl ModelHealthReport {
    pub fn all_healthy(&self) -> bool {
        self.text.healthy && self.vision.healthy
    }
}

impl ModelManager {
    /// Load both models and ask the runtime to keep them resident.
    ///
    /// Returns an error if either model cannot be warmed; the bootstrap
    /// turns that into exit code 1.
    pub async fn warm_up(
        runtime: Arc<dyn ModelRuntime>,
        text_model: &str,
        vision_model: &str,
    ) -> Result<Self, RuntimeError> {
        let started = std::time::Instant::now();
        runtime.ensure_available(text_model).await?;
        info!(model = text_model, "text model warmed");
        runtime.ensure_available(vision_model).await?;
        info!(
            model = vision_model,
            total_ms = started.elapsed().as_millis() as u64,
            "vision model warmed"
        );

        Ok(Self {
            runtime,
            text_model: text_model.to_string(),
            vision_model: vision_model.to_string(),
        })
    }

    pub fn runtime(&self) -> Arc<dyn ModelRuntime> {
        Arc::clone(&self.runtime)
    }

    pub fn text_model_name(&self) -> &str {
        &self.text_model
    }

    pub fn vision_model_name(&self) -> &str {
        &self.vision_model
    }

    /// Probe both models, reporting per-model health with elapsed times.
    pub async fn health_check_both(&self) -> Result<ModelHealthReport, RuntimeError> {
        let (text, vision) = futures_util::future::join(
            self.runtime.health_check(&self.text_model),
            self.runtime.health_check(&self.vision_model),
        )
        .await;
        Ok(ModelHealthReport {
            text: text?,
            vision: vision?,
        })
    }
}
