use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Bytes accepted for a single image attachment before it is skipped.
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024; // 10 MB
/// Messages handed to the pipeline per batch; ingestion waits for each
/// batch's completion signal before sending the next.
pub const PIPELINE_CHUNK: usize = 1000;

/// Top-level config (scribe.toml + SCRIBE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScribeConfig {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Platform credential (required).
    pub token: String,
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_text_model")]
    pub text: String,
    #[serde(default = "default_vision_model")]
    pub vision: String,
    #[serde(default = "default_embedding_model")]
    pub embedding: String,
    #[serde(default = "default_runtime_url")]
    pub runtime_url: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            text: default_text_model(),
            vision: default_vision_model(),
            embedding: default_embedding_model(),
            runtime_url: default_runtime_url(),
        }
    }
}

/// Rate Governor settings: at most `rps` requests per rolling second with
/// burst `burst`; 429s are retried `max_retries` times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    #[serde(default = "default_rps")]
    pub rps: f64,
    #[serde(default = "default_burst")]
    pub burst: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            rps: default_rps(),
            burst: default_burst(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    /// Character budget the answer prompt asks the model to stay within.
    #[serde(default = "default_answer_char_budget")]
    pub answer_char_budget: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            request_timeout_s: default_request_timeout_s(),
            max_tool_iterations: default_max_tool_iterations(),
            answer_char_budget: default_answer_char_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_concurrent_channels")]
    pub concurrent_channels: usize,
    #[serde(default = "default_messages_per_fetch")]
    pub messages_per_fetch: usize,
    /// Global default for servers without an explicit policy.
    #[serde(default)]
    pub on_failure: crate::types::FailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrent_channels: default_concurrent_channels(),
            messages_per_fetch: default_messages_per_fetch(),
            on_failure: crate::types::FailurePolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard cap on summary response tokens per link.
    #[serde(default = "default_summary_token_budget")]
    pub summary_token_budget: u32,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            summary_token_budget: default_summary_token_budget(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Root directory holding `<server_id>/vectors/` trees and shared tables.
    #[serde(default = "default_db_root")]
    pub root: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            root: default_db_root(),
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}
fn default_text_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_vision_model() -> String {
    "llava:13b".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_runtime_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_rps() -> f64 {
    5.0
}
fn default_burst() -> usize {
    10
}
fn default_max_retries() -> usize {
    3
}
fn default_capacity() -> usize {
    50
}
fn default_request_timeout_s() -> u64 {
    60
}
fn default_max_tool_iterations() -> usize {
    10
}
fn default_answer_char_budget() -> usize {
    1800
}
fn default_concurrent_channels() -> usize {
    5
}
fn default_messages_per_fetch() -> usize {
    1000
}
fn default_summary_token_budget() -> u32 {
    600
}
fn default_max_image_bytes() -> u64 {
    MAX_IMAGE_BYTES
}
fn default_db_root() -> String {
    "databases".to_string()
}

impl ScribeConfig {
    /// Load config from a TOML file with SCRIBE_* env var overrides.
    /// Sections are separated by double underscores, e.g.
    /// `SCRIBE_DISCORD__TOKEN`, `SCRIBE_RATE__RPS`.
    ///
    /// Checks in order: explicit path argument, then `./scribe.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("scribe.toml");

        let config: ScribeConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SCRIBE_").split("__"))
            .extract()
            .map_err(|e| crate::error::ScribeError::Config(e.to_string()))?;

        Ok(config)
    }
}
