pub mod manager;
pub mod ollama;
pub mod runtime;

pub use manager::{ModelHealthReport, ModelManager};
pub use ollama::OllamaRuntime;
pub use runtime::{
    ChatMessage, ChatOptions, ChatRequest, ChatResponse, ModelHealth, ModelRuntime, Role,
    RuntimeError, ToolCall, ToolDefinition,
};
