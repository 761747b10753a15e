use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp::config::ServerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub arguments: Vec<PromptArgument>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// What a server exposed the last time it was asked.
///
/// Never cached; callers must tolerate staleness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub tools: Vec<ToolDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
}

/// A tool invocation addressed to one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub text: String,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            text: text.into(),
        }
    }

    /// Text items keep their text; anything else becomes its JSON text.
    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::text(s.as_str()),
            Value::Object(obj) => match obj.get("text").and_then(Value::as_str) {
                Some(text) if is_textual(obj) => Self::text(text),
                _ => Self::text(value.to_string()),
            },
            other => Self::text(other.to_string()),
        }
    }
}

fn is_textual(obj: &Map<String, Value>) -> bool {
    // Tool and prompt content is tagged `type: "text"`; resource contents carry
    // a `uri` plus either `text` or `blob`.
    match obj.get("type").and_then(Value::as_str) {
        Some(kind) => kind == "text",
        None => obj.contains_key("uri"),
    }
}

/// Uniform result shape for tool calls, prompt runs and resource reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    /// Normalize a `tools/call` response.
    pub fn from_tool_response(raw: &Value) -> Self {
        Self {
            content: items(raw.get("content"), ContentItem::from_value),
            is_error: raw.get("isError").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    /// Normalize a `prompts/get` response: one item per prompt message.
    pub fn from_prompt_response(raw: &Value) -> Self {
        Self {
            content: items(raw.get("messages"), |msg| {
                ContentItem::from_value(msg.get("content").unwrap_or(&Value::Null))
            }),
            is_error: false,
        }
    }

    /// Normalize a `resources/read` response.
    pub fn from_resource_response(raw: &Value) -> Self {
        Self {
            content: items(raw.get("contents"), ContentItem::from_value),
            is_error: false,
        }
    }

    /// All text items joined, for feeding back into a model turn.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn items(list: Option<&Value>, map: impl Fn(&Value) -> ContentItem) -> Vec<ContentItem> {
    list.and_then(Value::as_array)
        .map(|arr| arr.iter().map(map).collect())
        .unwrap_or_default()
}

/// Identity a server reported during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub capabilities: Value,
}

impl ServerInfo {
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            version: "Unknown".to_string(),
            capabilities: Value::Object(Map::new()),
        }
    }

    /// Build from a serialized `initialize` result.
    pub fn from_initialize_result(raw: &Value) -> Self {
        let server = raw.get("serverInfo");
        let field = |key: &str| {
            server
                .and_then(|s| s.get(key))
                .and_then(Value::as_str)
                .map(ToString::to_string)
        };
        Self {
            name: field("name").unwrap_or_else(|| "MCP Server".to_string()),
            version: field("version").unwrap_or_else(|| "Unknown".to_string()),
            capabilities: raw
                .get("capabilities")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
        }
    }
}

/// Envelope returned by connect and describe calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedServer {
    pub config: ServerConfig,
    pub info: ServerInfo,
    pub tools: Vec<ToolDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub is_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ConnectedServer {
    pub fn connected(config: ServerConfig, info: ServerInfo, snapshot: CapabilitySnapshot) -> Self {
        Self {
            config,
            info,
            tools: snapshot.tools,
            prompts: snapshot.prompts,
            resources: snapshot.resources,
            is_connected: true,
            last_error: None,
        }
    }

    pub fn disconnected(config: ServerConfig, error: impl Into<String>) -> Self {
        Self {
            config,
            info: ServerInfo::unknown(),
            tools: Vec::new(),
            prompts: Vec::new(),
            resources: Vec::new(),
            is_connected: false,
            last_error: Some(error.into()),
        }
    }
}
