//! Client seam between the bridge and a live capability server.
//!
//! [`McpClient`] is the minimal protocol surface the bridge needs, and
//! [`Connector`] opens a [`Transport`] and performs the handshake. The
//! production implementations are backed by rmcp; tests substitute fakes.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::{
    model::{
        CallToolRequestParam, ClientCapabilities, ClientInfo, GetPromptRequestParam,
        ReadResourceRequestParam,
    },
    service::{DynService, Peer, RoleClient, RunningService, ServiceExt},
    transport::{
        StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::{process::Command, sync::Mutex};

use crate::mcp::{
    config::expand_env_map,
    sse_transport,
    transport::{Transport, TransportHandle},
    types::{PromptDescriptor, ResourceDescriptor, ServerInfo, ToolCall, ToolDescriptor},
};

/// Protocol operations against one connected server.
///
/// Call results are returned as raw JSON; the bridge normalizes them.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>>;
    async fn list_prompts(&self) -> anyhow::Result<Vec<PromptDescriptor>>;
    async fn list_resources(&self) -> anyhow::Result<Vec<ResourceDescriptor>>;
    async fn call_tool(&self, call: &ToolCall) -> anyhow::Result<Value>;
    async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> anyhow::Result<Value>;
    async fn read_resource(&self, uri: &str) -> anyhow::Result<Value>;

    /// End the protocol session. Called at most once per connection.
    async fn close(&self) -> anyhow::Result<()>;
}

/// A completed handshake.
pub struct Session {
    pub client: Arc<dyn McpClient>,
    pub info: ServerInfo,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("info", &self.info).finish_non_exhaustive()
    }
}

/// Opens transports and performs the protocol handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Everything spawned for the connection must stop when `handle` closes.
    async fn connect(
        &self,
        server_id: &str,
        transport: &Transport,
        handle: &TransportHandle,
    ) -> anyhow::Result<Session>;
}

type DynClientService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// rmcp-backed [`Connector`].
#[derive(Debug, Clone)]
pub struct RmcpConnector {
    client_info: ClientInfo,
}

impl Default for RmcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RmcpConnector {
    pub fn new() -> Self {
        let mut client_info = ClientInfo::default();
        client_info.client_info.name = env!("CARGO_PKG_NAME").to_string();
        client_info.client_info.version = env!("CARGO_PKG_VERSION").to_string();
        // Interest in tools, prompts and resource updates, including
        // subscriptions and list-changed notifications.
        client_info.capabilities = serde_json::from_value::<ClientCapabilities>(json!({
            "experimental": {
                "tools": { "listChanged": true },
                "prompts": { "listChanged": true },
                "resources": { "subscribe": true, "listChanged": true }
            }
        }))
        .unwrap_or_default();
        Self { client_info }
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        server_id: &str,
        transport: &Transport,
        handle: &TransportHandle,
    ) -> anyhow::Result<Session> {
        let handler = self.client_info.clone().into_dyn();
        let service: DynClientService = match transport {
            Transport::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args).envs(expand_env_map(env));
                let child = TokioChildProcess::new(cmd)
                    .with_context(|| format!("failed to spawn '{command}'"))?;
                handler.serve_with_ct(child, handle.token()).await?
            }
            Transport::Http { url, headers } => {
                let transport = StreamableHttpClientTransport::with_client(
                    http_client(headers)?,
                    StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                );
                handler.serve_with_ct(transport, handle.token()).await?
            }
            Transport::Sse { url, headers } => {
                let pair =
                    sse_transport::open(http_client(headers)?, url.clone(), handle.token())
                        .await?;
                handler.serve_with_ct(pair, handle.token()).await?
            }
        };

        let info = match service.peer_info() {
            Some(init) => ServerInfo::from_initialize_result(&serde_json::to_value(init)?),
            None => ServerInfo::unknown(),
        };

        Ok(Session {
            client: Arc::new(RmcpClient {
                server_id: server_id.to_string(),
                peer: service.peer().clone(),
                service: Mutex::new(Some(service)),
            }),
            info,
        })
    }
}

/// A reqwest client sending `headers` (after `${VAR}` expansion) on every request.
fn http_client(headers: &HashMap<String, String>) -> anyhow::Result<reqwest::Client> {
    let mut defaults = HeaderMap::new();
    for (name, value) in expand_env_map(headers) {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name '{name}'"))?;
        let value = HeaderValue::from_str(&value)
            .with_context(|| format!("invalid value for header '{name}'"))?;
        defaults.insert(name, value);
    }
    Ok(reqwest::Client::builder().default_headers(defaults).build()?)
}

/// [`McpClient`] over a running rmcp service.
struct RmcpClient {
    server_id: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<DynClientService>>,
}

impl std::fmt::Debug for RmcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpClient")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

/// Re-read rmcp model types as our descriptors through their JSON form.
fn reshape<S: serde::Serialize, T: DeserializeOwned>(items: Vec<S>) -> anyhow::Result<Vec<T>> {
    Ok(serde_json::from_value(serde_json::to_value(items)?)?)
}

#[async_trait]
impl McpClient for RmcpClient {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
        reshape(self.peer.list_all_tools().await?)
    }

    async fn list_prompts(&self) -> anyhow::Result<Vec<PromptDescriptor>> {
        reshape(self.peer.list_all_prompts().await?)
    }

    async fn list_resources(&self) -> anyhow::Result<Vec<ResourceDescriptor>> {
        reshape(self.peer.list_all_resources().await?)
    }

    async fn call_tool(&self, call: &ToolCall) -> anyhow::Result<Value> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: call.name.clone().into(),
                arguments: Some(call.arguments.clone()),
            })
            .await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> anyhow::Result<Value> {
        let params: GetPromptRequestParam =
            serde_json::from_value(json!({ "name": name, "arguments": arguments }))?;
        let result = self.peer.get_prompt(params).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn read_resource(&self, uri: &str) -> anyhow::Result<Value> {
        let params: ReadResourceRequestParam = serde_json::from_value(json!({ "uri": uri }))?;
        let result = self.peer.read_resource(params).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Some(service) = self.service.lock().await.take() {
            let reason = service.cancel().await?;
            tracing::debug!(server_id = %self.server_id, reason = ?reason, "MCP session closed");
        }
        Ok(())
    }
}
