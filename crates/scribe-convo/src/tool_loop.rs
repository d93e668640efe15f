//! Tool-calling loop, modeled as a bounded iteration state machine.
//!
//! States: awaiting the model, tool requested, tool executing, final,
//! errored. The wall-clock deadline is enforced by the worker wrapping the
//! whole loop; the iteration cap is enforced here.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use scribe_model::runtime::{
    ChatMessage, ChatOptions, ChatRequest, ModelRuntime, RuntimeError, ToolCall, ToolDefinition,
};

/// Something the model is allowed to call.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one call and return the result text fed back to the model.
    /// Unknown tools return an error string rather than failing the loop.
    async fn execute(&self, call: &ToolCall) -> String;
}

/// Terminal result of a loop run.
#[derive(Debug)]
pub enum LoopOutcome {
    /// The model produced a final answer.
    Final(String),
    /// The iteration cap was reached; carries the last content seen.
    IterationCapped(String),
    Errored(RuntimeError),
}

enum LoopState {
    AwaitingModel,
    ToolRequested(Vec<ToolCall>),
    Final(String),
    Errored(RuntimeError),
}

/// Drive the model until it stops requesting tools, up to
/// `max_iterations` model round trips.
pub async fn run_tool_loop(
    runtime: &dyn ModelRuntime,
    model: &str,
    executor: &dyn ToolExecutor,
    mut messages: Vec<ChatMessage>,
    options: ChatOptions,
    max_iterations: usize,
) -> LoopOutcome {
    let tools = executor.definitions();
    let cap = max_iterations.max(1);
    let mut last_content = String::new();
    let mut rounds = 0usize;
    let mut state = LoopState::AwaitingModel;

    loop {
        state = match state {
            LoopState::AwaitingModel => {
                if rounds >= cap {
                    warn!(max_iterations = cap, "tool loop hit iteration cap");
                    break LoopOutcome::IterationCapped(last_content);
                }
                rounds += 1;

                let request = ChatRequest {
                    model: model.to_string(),
                    messages: messages.clone(),
                    tools: tools.clone(),
                    options: options.clone(),
                };
                debug!(round = rounds, "tool loop awaiting model");
                match runtime.chat(&request).await {
                    Ok(response) => {
                        if !response.content.is_empty() {
                            last_content = response.content.clone();
                        }
                        if response.tool_calls.is_empty() {
                            LoopState::Final(response.content)
                        } else {
                            messages.push(ChatMessage::assistant_with_calls(
                                response.content,
                                response.tool_calls.clone(),
                            ));
                            LoopState::ToolRequested(response.tool_calls)
                        }
                    }
                    Err(e) => LoopState::Errored(e),
                }
            }
            LoopState::ToolRequested(calls) => {
                for call in &calls {
                    debug!(tool = %call.name, "executing tool");
                    let result = executor.execute(call).await;
                    messages.push(ChatMessage::tool(result));
                }
                LoopState::AwaitingModel
            }
            LoopState::Final(content) => {
                info!(rounds, "tool loop complete");
                break LoopOutcome::Final(content);
            }
            LoopState::Errored(e) => break LoopOutcome::Errored(e),
        };
    }
}
