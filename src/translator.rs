//! Chat request → wire event stream.
//!
//! The translator checks the request preconditions, gathers the live tool
//! set, and turns orchestrator output into [`WireEvent`]s. Every path ends
//! with exactly one `done`:
//!
//! ```text
//! IDLE ──no key / no messages──────────────▶ error, done
//!  │
//!  ▼
//! STREAMING ──text / tool invocations──▶ text / tool_call ...
//!  │            │
//!  │ end        │ upstream failure
//!  ▼            ▼
//! done        error, done
//! ```

use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    llm::{ChatMessage, LlmSettings, Orchestrator},
    mcp::CapabilityBridge,
    wire::{ErrorCode, WireEvent, WireStream},
};

/// Body of a chat stream request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Parse a request body. Anything unreadable counts as an empty request.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct StreamTranslator {
    settings: LlmSettings,
    orchestrator: Orchestrator,
    bridge: CapabilityBridge,
}

impl StreamTranslator {
    pub fn new(
        settings: LlmSettings,
        orchestrator: Orchestrator,
        bridge: CapabilityBridge,
    ) -> Self {
        Self {
            settings,
            orchestrator,
            bridge,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.settings.has_credential()
    }

    /// Lazily translate `request` into wire events.
    ///
    /// Firing `cancel` stops emission and drops the upstream stream; the
    /// terminal `done` is still produced. The registry is never touched
    /// beyond reading the tool set.
    pub fn translate(&self, request: ChatRequest, cancel: CancellationToken) -> WireStream {
        let this = self.clone();

        let stream = async_stream::stream! {
            if !this.has_credential() {
                yield WireEvent::error(ErrorCode::NoApiKey, "No upstream API key is configured");
                yield WireEvent::Done;
                return;
            }
            if request.messages.is_empty() {
                yield WireEvent::error(ErrorCode::NoMessages, "Request contains no messages");
                yield WireEvent::Done;
                return;
            }

            let request_id = Uuid::new_v4().to_string();
            let tools = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                tools = this.bridge.tool_set() => Some(tools),
            };
            let Some(tools) = tools else {
                info!(name: "chat.stream.cancelled", request_id = %request_id, "Chat stream cancelled");
                yield WireEvent::Done;
                return;
            };
            info!(
                name: "chat.stream.start",
                request_id = %request_id,
                message_count = request.messages.len(),
                tool_count = tools.len(),
                "Starting chat stream"
            );

            let messages = request.messages.iter().map(ChatMessage::to_json).collect();
            let mut upstream = this.orchestrator.run(request_id.clone(), messages, tools);

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!(name: "chat.stream.cancelled", request_id = %request_id, "Chat stream cancelled");
                        break;
                    }
                    next = upstream.next() => next,
                };

                match next {
                    Some(Ok(chunk)) => {
                        if let Some(text) = chunk.text.filter(|t| !t.is_empty()) {
                            yield WireEvent::text(text);
                        }
                        for call in chunk.tool_calls {
                            yield WireEvent::tool_call(call.name, call.arguments);
                        }
                    }
                    Some(Err(e)) => {
                        let code = ErrorCode::from(&e);
                        error!(
                            name: "chat.stream.error",
                            request_id = %request_id,
                            code = ?code,
                            error = %e,
                            "Chat stream failed"
                        );
                        yield WireEvent::error(code, e.to_string());
                        break;
                    }
                    None => {
                        info!(name: "chat.stream.complete", request_id = %request_id, "Chat stream complete");
                        break;
                    }
                }
            }

            drop(upstream);
            yield WireEvent::Done;
        };

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_body_is_empty_request() {
        assert!(ChatRequest::from_body(b"not json").messages.is_empty());
        assert!(ChatRequest::from_body(b"{}").messages.is_empty());
    }

    #[test]
    fn reads_role_and_content() {
        let req = ChatRequest::from_body(br#"{"messages":[{"role":"user","content":"hi"}]}"#);
        assert_eq!(req.messages, vec![ChatMessage::user("hi")]);
    }
}
