use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::runtime::{
    ChatRequest, ChatResponse, ModelHealth, ModelRuntime, Role, RuntimeError, ToolCall,
};

/// Residency hint passed on every call so models stay warm between batches.
const KEEP_ALIVE: &str = "30m";

/// Non-streaming Ollama-backed model runtime.
pub struct OllamaRuntime {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaRuntime {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
        }
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, RuntimeError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                // Surface connection errors as Unavailable so callers can
                // distinguish "runtime down" from a bad request.
                if e.is_connect() || e.is_timeout() {
                    RuntimeError::Unavailable(e.to_string())
                } else {
                    RuntimeError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, path, body = %text, "Ollama API error");
            if status == 429 {
                return Err(RuntimeError::RateLimited { retry_after_ms: 1000 });
            }
            return Err(RuntimeError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelRuntime for OllamaRuntime {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, RuntimeError> {
        let body = build_chat_body(req);
        debug!(model = %req.model, tools = req.tools.len(), "sending chat request to Ollama");

        let resp = self.post_json("/api/chat", &body).await?;
        let api_resp: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| RuntimeError::Parse(e.to_string()))?;

        Ok(parse_chat_response(api_resp))
    }

    async fn describe_image(
        &self,
        model: &str,
        bytes: &[u8],
        prompt: &str,
    ) -> Result<String, RuntimeError> {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        let body = serde_json::json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": prompt,
                "images": [b64],
            }],
            "stream": false,
            "keep_alive": KEEP_ALIVE,
            "options": { "temperature": 0.1 },
        });

        debug!(model, bytes = bytes.len(), "sending image to vision model");

        let resp = self.post_json("/api/chat", &body).await?;
        let api_resp: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| RuntimeError::Parse(e.to_string()))?;

        Ok(api_resp.message.content)
    }

    async fn embed(
        &self,
        model: &str,
        documents: &[String],
    ) -> Result<Vec<Vec<f32>>, RuntimeError> {
        let body = serde_json::json!({
            "model": model,
            "input": documents,
            "keep_alive": KEEP_ALIVE,
        });

        let resp = self.post_json("/api/embed", &body).await?;
        let api_resp: EmbedApiResponse = resp
            .json()
            .await
            .map_err(|e| RuntimeError::Parse(e.to_string()))?;

        if api_resp.embeddings.len() != documents.len() {
            return Err(RuntimeError::Parse(format!(
                "embedding count mismatch: {} documents, {} vectors",
                documents.len(),
                api_resp.embeddings.len()
            )));
        }
        Ok(api_resp.embeddings)
    }

    async fn ensure_available(&self, model: &str) -> Result<(), RuntimeError> {
        // An empty generate request loads the model and applies keep_alive.
        let body = serde_json::json!({
            "model": model,
            "keep_alive": KEEP_ALIVE,
        });
        self.post_json("/api/generate", &body).await?;
        debug!(model, keep_alive = KEEP_ALIVE, "model warmed");
        Ok(())
    }

    async fn health_check(&self, model: &str) -> Result<ModelHealth, RuntimeError> {
        let started = std::time::Instant::now();
        let body = serde_json::json!({ "model": model });
        let result = self.post_json("/api/show", &body).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(_) => Ok(ModelHealth {
                model: model.to_string(),
                healthy: true,
                elapsed_ms,
                detail: None,
            }),
            Err(e) => Ok(ModelHealth {
                model: model.to_string(),
                healthy: false,
                elapsed_ms,
                detail: Some(e.to_string()),
            }),
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn build_chat_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            let mut msg = serde_json::json!({
                "role": role_str(m.role),
                "content": m.content,
            });
            if !m.tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "function": { "name": c.name, "arguments": c.arguments },
                        })
                    })
                    .collect();
                msg["tool_calls"] = serde_json::Value::Array(calls);
            }
            msg
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": false,
        "keep_alive": KEEP_ALIVE,
    });

    let mut options = serde_json::Map::new();
    if let Some(t) = req.options.temperature {
        options.insert("temperature".into(), serde_json::json!(t));
    }
    if let Some(n) = req.options.max_tokens {
        options.insert("num_predict".into(), serde_json::json!(n));
    }
    if !options.is_empty() {
        body["options"] = serde_json::Value::Object(options);
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

fn parse_chat_response(resp: ChatApiResponse) -> ChatResponse {
    let tool_calls = resp
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall {
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();

    ChatResponse {
        content: resp.message.content,
        model: resp.model,
        tokens_in: resp.prompt_eval_count.unwrap_or(0),
        tokens_out: resp.eval_count.unwrap_or(0),
        done_reason: resp.done_reason.unwrap_or_else(|| "stop".to_string()),
        tool_calls,
    }
}

// Ollama API response types (private, deserialization only)

#[derive(Deserialize)]
struct ChatApiResponse {
    model: String,
    message: ApiMessage,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: String,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiToolFunction,
}

#[derive(Deserialize)]
struct ApiToolFunction {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct EmbedApiResponse {
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ChatMessage, ChatOptions, ToolDefinition};

    #[test]
    fn chat_body_includes_tools_and_options() {
        let req = ChatRequest {
            model: "llama3.1:8b".into(),
            messages: vec![ChatMessage::system("s"), ChatMessage::user("u")],
            tools: vec![ToolDefinition {
                name: "search_messages".into(),
                description: "search".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            options: ChatOptions {
                temperature: Some(0.2),
                max_tokens: Some(600),
            },
        };
        let body = build_chat_body(&req);
        assert_eq!(body["model"], "llama3.1:8b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 600);
        assert_eq!(body["tools"][0]["function"]["name"], "search_messages");
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn parse_response_maps_tool_calls() {
        let raw = serde_json::json!({
            "model": "llama3.1:8b",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "search_messages", "arguments": {"query": "logs"}}}
                ]
            },
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 10,
            "eval_count": 5
        });
        let resp: ChatApiResponse = serde_json::from_value(raw).unwrap();
        let parsed = parse_chat_response(resp);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "search_messages");
        assert_eq!(parsed.tool_calls[0].arguments["query"], "logs");
        assert_eq!(parsed.tokens_in, 10);
    }
}
