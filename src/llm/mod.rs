//! Upstream model drivers and the tool loop.
//!
//! The [`ModelDriver`] trait defines the streaming interface every upstream
//! implementation supports. The [`Orchestrator`] builds on a driver and runs
//! model-requested tools through the capability bridge.
//!
//! # Drivers
//!
//! - [`ChatCompletionsDriver`]: OpenAI-compatible Chat Completions
//!   (`{base_url}/chat/completions`), which Gemini also serves.

pub mod chat_completions;
pub mod orchestrator;

pub use chat_completions::ChatCompletionsDriver;
pub use orchestrator::Orchestrator;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default upstream: Gemini's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Upstream connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL including any version prefix.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl LlmSettings {
    /// Whether a non-blank API key is configured.
    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn of the client-supplied conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Chat Completions message object.
    pub fn to_json(&self) -> Value {
        serde_json::json!({ "role": self.role, "content": self.content })
    }
}

/// Request to a [`ModelDriver`].
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Conversation messages in Chat Completions format.
    pub messages: Vec<Value>,
    /// Function declarations; empty when no tools are available.
    pub tools: Vec<Value>,
}

/// A fully assembled tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// One increment of model output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelChunk {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

impl ModelChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }
}

/// Failure establishing or iterating an upstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The upstream answered with an HTTP error status.
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never got a usable answer (connect, read, decode).
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("{0}")]
    Internal(String),
}

impl ModelError {
    /// HTTP status for classification. Failures without one count as 500.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(_) => Some(500),
            Self::Internal(_) => None,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => Self::Transport(e.to_string()),
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ModelChunk, ModelError>> + Send>>;

/// Streaming access to an upstream model.
#[async_trait::async_trait]
pub trait ModelDriver: Send + Sync {
    /// Open a response stream for `req`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is rejected or cannot be sent.
    async fn stream(&self, req: ModelRequest) -> Result<ChunkStream, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_is_no_credential() {
        let mut settings = LlmSettings::default();
        assert!(!settings.has_credential());
        settings.api_key = Some("  ".to_string());
        assert!(!settings.has_credential());
        settings.api_key = Some("key".to_string());
        assert!(settings.has_credential());
    }

    #[test]
    fn debug_redacts_api_key() {
        let settings = LlmSettings {
            api_key: Some("sk-secret".to_string()),
            ..LlmSettings::default()
        };
        assert!(!format!("{settings:?}").contains("sk-secret"));
    }

    #[test]
    fn transport_failures_classify_as_500() {
        assert_eq!(ModelError::Transport("reset".into()).status(), Some(500));
        assert_eq!(ModelError::Internal("loop".into()).status(), None);
    }

    #[test]
    fn message_json_uses_lowercase_roles() {
        let json = ChatMessage::assistant("hi").to_json();
        assert_eq!(json, serde_json::json!({ "role": "assistant", "content": "hi" }));
    }
}
