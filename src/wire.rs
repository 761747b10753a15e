//! Wire events for the chat stream and their SSE framing.
//!
//! Every event is written as a single `data: <json>\n\n` frame, with the
//! event kind in the JSON `type` field:
//!
//! ```text
//! data: {"type":"text","delta":"Hel"}
//!
//! data: {"type":"tool_call","tool":{"name":"time__now","args":{}}}
//!
//! data: {"type":"error","code":"RATE_LIMIT","message":"..."}
//!
//! data: {"type":"done"}
//! ```
//!
//! A stream always ends with `done`, on success and failure alike.

use std::{convert::Infallible, pin::Pin};

use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::Response,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::ModelError;

/// Client-facing stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// Incremental assistant text.
    Text { delta: String },
    /// The model invoked a tool.
    ToolCall { tool: ToolCallPayload },
    /// The stream failed; `done` follows.
    Error { code: ErrorCode, message: String },
    /// Terminal event.
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub name: String,
    pub args: Map<String, Value>,
}

impl WireEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::Text {
            delta: delta.into(),
        }
    }

    pub fn tool_call(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self::ToolCall {
            tool: ToolCallPayload {
                name: name.into(),
                args,
            },
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Machine-readable failure class carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoApiKey,
    NoMessages,
    Unauthorized,
    RateLimit,
    UpstreamError,
    InternalError,
}

impl ErrorCode {
    /// Bucket an upstream HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            429 => Self::RateLimit,
            s if s >= 500 => Self::UpstreamError,
            _ => Self::InternalError,
        }
    }
}

impl From<&ModelError> for ErrorCode {
    fn from(e: &ModelError) -> Self {
        e.status().map_or(Self::InternalError, Self::from_status)
    }
}

pub type WireStream = Pin<Box<dyn Stream<Item = WireEvent> + Send>>;

/// Encode one event as an SSE frame.
pub fn frame(event: &WireEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "code": "INTERNAL_ERROR", "message": e.to_string() })
            .to_string()
    });
    format!("data: {json}\n\n")
}

/// Frames for `events`, ending after the first `done`.
pub fn frames(events: WireStream) -> impl Stream<Item = String> + Send {
    let mut finished = false;
    events
        .take_while(move |event| {
            let emit = !finished;
            finished |= event.is_done();
            futures::future::ready(emit)
        })
        .map(|event| frame(&event))
}

/// Streaming HTTP response carrying `events`.
pub fn sse_response(events: WireStream) -> Response {
    let body = Body::from_stream(frames(events).map(Ok::<String, Infallible>));
    build_sse_response(body)
}

/// A complete response holding exactly `events`.
pub fn sse_response_from(events: Vec<WireEvent>) -> Response {
    let payload: String = events.iter().map(frame).collect();
    build_sse_response(Body::from(payload))
}

fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    h.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("x-accel-buffering", HeaderValue::from_static("no"));
    resp
}
