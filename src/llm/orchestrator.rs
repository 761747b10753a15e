//! Model orchestration with tool loop execution.
//!
//! The orchestrator manages one model interaction:
//! 1. Send the conversation and the current tool declarations to the driver
//! 2. Pass every chunk through to the caller as it arrives
//! 3. When the turn ends with tool invocations, run them via the bridge
//! 4. Feed the results back and repeat until the model answers without tools

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};

use crate::mcp::{CapabilityBridge, ToolCall, ToolSet};

use super::{ChunkStream, ModelDriver, ModelError, ModelRequest, ToolInvocation};

/// Maximum number of tool loop iterations to prevent infinite loops.
const MAX_TOOL_ITERATIONS: usize = 10;

#[derive(Clone)]
pub struct Orchestrator {
    driver: Arc<dyn ModelDriver>,
    bridge: CapabilityBridge,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(driver: Arc<dyn ModelDriver>, bridge: CapabilityBridge) -> Self {
        Self { driver, bridge }
    }

    /// Stream the model's answer to `messages`, executing requested tools
    /// from `tools` along the way.
    ///
    /// Text and tool invocations from every iteration are yielded in arrival
    /// order. Tool failures are reported back to the model as text; only
    /// upstream failures end the stream with an error.
    pub fn run(&self, request_id: String, messages: Vec<Value>, tools: ToolSet) -> ChunkStream {
        let orchestrator = self.clone();

        let stream = async_stream::stream! {
            let declarations = tools.openai_tools_json();
            let mut history = messages;

            for iteration in 1..=MAX_TOOL_ITERATIONS {
                tracing::info!(
                    request_id = %request_id,
                    iteration,
                    message_count = history.len(),
                    tool_count = declarations.len(),
                    "Starting tool loop iteration"
                );

                let req = ModelRequest {
                    messages: history.clone(),
                    tools: declarations.clone(),
                };
                let mut upstream = match orchestrator.driver.stream(req).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(request_id = %request_id, iteration, error = %e, "Failed to create driver stream");
                        yield Err(e);
                        return;
                    }
                };

                let mut assistant_text = String::new();
                let mut invocations: Vec<ToolInvocation> = Vec::new();

                while let Some(item) = upstream.next().await {
                    match item {
                        Ok(chunk) => {
                            if let Some(text) = &chunk.text {
                                assistant_text.push_str(text);
                            }
                            invocations.extend(chunk.tool_calls.iter().cloned());
                            yield Ok(chunk);
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                if invocations.is_empty() {
                    tracing::info!(request_id = %request_id, iteration, "No tool calls to process, completing stream");
                    return;
                }

                history.push(assistant_tool_message(&assistant_text, &invocations));

                for invocation in &invocations {
                    let content = orchestrator.execute(&request_id, &tools, invocation).await;
                    history.push(json!({
                        "role": "tool",
                        "tool_call_id": invocation.id,
                        "content": content
                    }));
                }
            }

            tracing::error!(
                request_id = %request_id,
                max_iterations = MAX_TOOL_ITERATIONS,
                "Maximum tool loop iterations exceeded"
            );
            yield Err(ModelError::Internal("maximum tool loop iterations exceeded".to_string()));
        };

        Box::pin(stream)
    }

    /// Run one invocation, returning the text fed back to the model.
    async fn execute(
        &self,
        request_id: &str,
        tools: &ToolSet,
        invocation: &ToolInvocation,
    ) -> String {
        let Some(route) = tools.route(&invocation.name) else {
            tracing::warn!(request_id = %request_id, tool_name = %invocation.name, "Model requested an unknown tool");
            return format!("Error: unknown tool: {}", invocation.name);
        };

        tracing::info!(
            request_id = %request_id,
            tool_id = %invocation.id,
            tool_name = %invocation.name,
            server_id = %route.server_id,
            "Executing tool call"
        );

        let call = ToolCall::new(route.tool_name.clone(), invocation.arguments.clone());
        match self.bridge.invoke_tool(&route.server_id, &call).await {
            Ok(result) => {
                let content = result.joined_text();
                tracing::debug!(
                    request_id = %request_id,
                    tool_id = %invocation.id,
                    is_error = result.is_error,
                    result_length = content.len(),
                    "Tool call finished"
                );
                content
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    tool_id = %invocation.id,
                    tool_name = %invocation.name,
                    error = %e,
                    "Tool call failed"
                );
                format!("Error: {e}")
            }
        }
    }
}

fn assistant_tool_message(text: &str, invocations: &[ToolInvocation]) -> Value {
    json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { Value::String(text.to_string()) },
        "tool_calls": invocations.iter().map(|tc| {
            json!({
                "id": tc.id,
                "type": "function",
                "function": {
                    "name": tc.name,
                    "arguments": Value::Object(tc.arguments.clone()).to_string()
                }
            })
        }).collect::<Vec<_>>()
    })
}
