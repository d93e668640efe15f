use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls carried by an assistant turn being replayed to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// An assistant turn that requested tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
        }
    }

    /// A tool result fed back into the conversation.
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool definition sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Sampling and budget knobs for a single chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Request to the model runtime (non-streaming).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Tools to expose to the model. Empty by default.
    pub tools: Vec<ToolDefinition>,
    pub options: ChatOptions,
}

/// Response from the model runtime.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    /// Why the model stopped (e.g. "stop", "length").
    pub done_reason: String,
    /// Tool calls requested by the model. Empty when no tools are called.
    pub tool_calls: Vec<ToolCall>,
}

/// Health probe outcome for a single model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelHealth {
    pub model: String,
    pub healthy: bool,
    pub elapsed_ms: u64,
    pub detail: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Model runtime unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Contract consumed from the model runtime: text chat with tool calling,
/// vision description, embeddings, and residency management.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Runtime name for logging.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, RuntimeError>;

    /// Describe an image with a vision model.
    async fn describe_image(
        &self,
        model: &str,
        bytes: &[u8],
        prompt: &str,
    ) -> Result<String, RuntimeError>;

    /// Embed a batch of documents, one vector per document, in order.
    async fn embed(&self, model: &str, documents: &[String])
        -> Result<Vec<Vec<f32>>, RuntimeError>;

    /// Load the model and ask the runtime to keep it resident.
    async fn ensure_available(&self, model: &str) -> Result<(), RuntimeError>;

    /// Cheap availability probe; does not run inference.
    async fn health_check(&self, model: &str) -> Result<ModelHealth, RuntimeError>;
}
