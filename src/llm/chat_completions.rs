//! OpenAI-compatible Chat Completions driver.
//!
//! This module implements the [`ModelDriver`] trait for the Chat Completions
//! API (`{base_url}/chat/completions`), streaming text deltas and assembling
//! streamed tool-call fragments into complete invocations.

use std::collections::BTreeMap;

use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::mcp::sse_transport::SseDecoder;

use super::{
    ChunkStream, LlmSettings, ModelChunk, ModelDriver, ModelError, ModelRequest, ToolInvocation,
};

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default)]
struct ToolAccum {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Driver for Chat Completions endpoints.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsDriver {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl ModelDriver for ChatCompletionsDriver {
    async fn stream(&self, req: ModelRequest) -> Result<ChunkStream, ModelError> {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": req.messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools);
        }

        let mut rb = self.http.post(self.endpoint()).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = error_message(&text)
                .or_else(|| status.canonical_reason().map(ToString::to_string))
                .unwrap_or_else(|| "request failed".to_string());
            return Err(ModelError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let byte_stream = resp.bytes_stream();

        let out = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            let mut tool_accum: BTreeMap<usize, ToolAccum> = BTreeMap::new();

            futures::pin_mut!(byte_stream);
            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ModelError::from(e));
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        break 'read;
                    }

                    let v: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            yield Err(ModelError::Transport(format!("malformed stream chunk: {e}")));
                            return;
                        }
                    };

                    if let Some(err) = stream_error(&v) {
                        yield Err(err);
                        return;
                    }

                    let choice = &v["choices"][0];
                    let delta = &choice["delta"];

                    // Assistant text delta
                    if let Some(s) = delta.get("content").and_then(Value::as_str) {
                        if !s.is_empty() {
                            yield Ok(ModelChunk::text(s));
                        }
                    }

                    // Tool call fragments
                    if let Some(arr) = delta.get("tool_calls").and_then(Value::as_array) {
                        for tc in arr {
                            accumulate(&mut tool_accum, tc);
                        }
                    }

                    // Any finish reason closes the pending tool calls
                    let finished = choice.get("finish_reason").and_then(Value::as_str).is_some();
                    if finished && !tool_accum.is_empty() {
                        yield Ok(ModelChunk::tool_calls(drain_tool_calls(&mut tool_accum)));
                    }
                }
            }

            if !tool_accum.is_empty() {
                yield Ok(ModelChunk::tool_calls(drain_tool_calls(&mut tool_accum)));
            }
        };

        Ok(Box::pin(out))
    }
}

fn accumulate(tool_accum: &mut BTreeMap<usize, ToolAccum>, tc: &Value) {
    let id = tc.get("id").and_then(Value::as_str).map(ToString::to_string);
    // Some providers omit `index` and send each call whole.
    let idx = match tc.get("index").and_then(Value::as_u64) {
        Some(i) => usize::try_from(i).unwrap_or(usize::MAX),
        None if id.is_some() => tool_accum.len(),
        None => tool_accum.len().saturating_sub(1),
    };
    let function = tc.get("function");
    let name = function
        .and_then(|f| f.get("name"))
        .and_then(Value::as_str);
    let args_delta = function
        .and_then(|f| f.get("arguments"))
        .and_then(Value::as_str);

    let entry = tool_accum.entry(idx).or_default();
    if entry.id.is_none() {
        entry.id = id;
    }
    if entry.name.is_none() {
        entry.name = name.map(ToString::to_string);
    }
    if let Some(ad) = args_delta {
        entry.args.push_str(ad);
    }
}

fn drain_tool_calls(tool_accum: &mut BTreeMap<usize, ToolAccum>) -> Vec<ToolInvocation> {
    std::mem::take(tool_accum)
        .into_values()
        .filter_map(|a| {
            let name = a.name?;
            let arguments = parse_arguments(&name, &a.args);
            Some(ToolInvocation {
                id: a.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                name,
                arguments,
            })
        })
        .collect()
}

fn parse_arguments(name: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(tool = %name, arguments = %raw, "Tool arguments are not a JSON object");
            Map::new()
        }
    }
}

/// Error object embedded in a 2xx stream.
fn stream_error(v: &Value) -> Option<ModelError> {
    let err = v.get("error")?;
    let status = err
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(500);
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("upstream stream error")
        .to_string();
    Some(ModelError::Status { status, message })
}

/// `error.message` from an error body, which may be an object or a
/// one-element array of objects.
fn error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    let v = match v {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    v.get("error")?
        .get("message")?
        .as_str()
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_error_message_from_object_and_array() {
        assert_eq!(
            error_message(r#"{"error":{"message":"quota exceeded","code":429}}"#).as_deref(),
            Some("quota exceeded")
        );
        assert_eq!(
            error_message(r#"[{"error":{"message":"bad key"}}]"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(error_message("upstream down"), None);
    }

    #[test]
    fn assembles_fragmented_tool_calls() {
        let mut accum = BTreeMap::new();
        accumulate(
            &mut accum,
            &json!({
                "index": 0,
                "id": "call_1",
                "function": { "name": "time__now", "arguments": "{\"tz\":" }
            }),
        );
        accumulate(&mut accum, &json!({ "index": 0, "function": { "arguments": "\"UTC\"}" } }));

        let calls = drain_tool_calls(&mut accum);
        assert!(accum.is_empty());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "time__now");
        assert_eq!(calls[0].arguments["tz"], "UTC");
    }

    #[test]
    fn whole_calls_without_index_stay_separate() {
        let mut accum = BTreeMap::new();
        for (id, name) in [("a", "x__one"), ("b", "x__two")] {
            accumulate(
                &mut accum,
                &json!({ "id": id, "function": { "name": name, "arguments": "{}" } }),
            );
        }
        let names: Vec<_> = drain_tool_calls(&mut accum).into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["x__one", "x__two"]);
    }

    #[test]
    fn non_object_arguments_become_empty() {
        assert!(parse_arguments("t", "[1,2]").is_empty());
        assert!(parse_arguments("t", "").is_empty());
    }

    #[test]
    fn in_stream_error_carries_code() {
        let chunk = json!({ "error": { "code": 429, "message": "slow down" } });
        let err = stream_error(&chunk).unwrap();
        assert_eq!(
            err,
            ModelError::Status {
                status: 429,
                message: "slow down".to_string()
            }
        );
        assert!(stream_error(&json!({ "choices": [] })).is_none());
    }
}
