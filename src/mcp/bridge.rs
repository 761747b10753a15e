//! Capability bridge: the operations the HTTP layer and the tool loop use.
//!
//! The bridge owns no state of its own. It combines the transport factory,
//! a [`Connector`] and the shared [`ConnectionRegistry`], and converts every
//! protocol failure into a [`BridgeError`] at its boundary.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::mcp::{
    client::{Connector, McpClient},
    config::ServerConfig,
    error::BridgeError,
    registry::{ActiveConnection, ConnectionRegistry},
    tools::ToolSet,
    transport::{self, TransportHandle},
    types::{
        CapabilitySnapshot, ConnectedServer, PromptDescriptor, ResourceDescriptor, ToolCall,
        ToolDescriptor, ToolResult,
    },
};

/// Upper bound on one capability listing. A server that never answers
/// counts as a failed listing.
const LISTING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct CapabilityBridge {
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for CapabilityBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityBridge")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Outcome of listing the three capability facets.
struct Introspection {
    tools: anyhow::Result<Vec<ToolDescriptor>>,
    prompts: anyhow::Result<Vec<PromptDescriptor>>,
    resources: anyhow::Result<Vec<ResourceDescriptor>>,
}

impl Introspection {
    async fn run(client: &dyn McpClient) -> Self {
        let (tools, prompts, resources) = tokio::join!(
            bounded("tools", client.list_tools()),
            bounded("prompts", client.list_prompts()),
            bounded("resources", client.list_resources()),
        );
        Self {
            tools,
            prompts,
            resources,
        }
    }

    fn all_failed(&self) -> bool {
        self.tools.is_err() && self.prompts.is_err() && self.resources.is_err()
    }

    /// Each failed facet degrades to empty on its own.
    fn into_snapshot(self, server_id: &str) -> CapabilitySnapshot {
        CapabilitySnapshot {
            tools: facet(server_id, "tools", self.tools),
            prompts: facet(server_id, "prompts", self.prompts),
            resources: facet(server_id, "resources", self.resources),
        }
    }
}

async fn bounded<T>(
    facet: &'static str,
    listing: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::time::timeout(LISTING_TIMEOUT, listing)
        .await
        .unwrap_or_else(|_| {
            Err(anyhow::anyhow!(
                "{facet} listing timed out after {}s",
                LISTING_TIMEOUT.as_secs()
            ))
        })
}

fn facet<T>(server_id: &str, facet: &'static str, result: anyhow::Result<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        debug!(name: "mcp.introspect.facet_failed", server_id, facet, error = %e, "Capability listing failed");
        Vec::new()
    })
}

impl CapabilityBridge {
    pub fn new(registry: Arc<ConnectionRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Connect to the server described by `config` and introspect it.
    ///
    /// Never fails: configuration and handshake errors come back as a
    /// disconnected envelope with `last_error` set, and leave no registry
    /// entry behind.
    pub async fn connect(&self, config: ServerConfig) -> ConnectedServer {
        let id = config.id.clone();
        if self.registry.remove(&id).await {
            debug!(server_id = %id, "Closed previous connection before reconnecting");
        }

        let transport = match transport::build(&config) {
            Ok(transport) => transport,
            Err(e) => {
                warn!(name: "mcp.server.config_invalid", server_id = %id, error = %e, "Invalid server configuration");
                return ConnectedServer::disconnected(config, e.to_string());
            }
        };

        let handle = TransportHandle::for_transport(&transport);
        let session = match self.connector.connect(&id, &transport, &handle).await {
            Ok(session) => session,
            Err(e) => {
                handle.close();
                let error = BridgeError::Connection(format!("{e:#}"));
                warn!(name: "mcp.server.connect_failed", server_id = %id, transport = %transport.kind(), error = %error, "Handshake failed");
                return ConnectedServer::disconnected(config, error.to_string());
            }
        };

        let info = session.info.clone();
        let connection = self
            .registry
            .put(ActiveConnection::new(config.clone(), session.info, session.client, handle))
            .await;
        info!(
            name: "mcp.server.connected",
            server_id = %id,
            transport = %transport.kind(),
            target = %transport.target(),
            server_name = %info.name,
            "Connected to MCP server"
        );

        let snapshot = Introspection::run(connection.client().as_ref())
            .await
            .into_snapshot(&id);
        info!(
            name: "mcp.server.introspected",
            server_id = %id,
            tools = snapshot.tools.len(),
            prompts = snapshot.prompts.len(),
            resources = snapshot.resources.len(),
            "Listed server capabilities"
        );

        ConnectedServer::connected(config, info, snapshot)
    }

    /// Close and forget the connection for `id`. Absent ids are a no-op.
    pub async fn disconnect(&self, id: &str) -> bool {
        let removed = self.registry.remove(id).await;
        if removed {
            info!(name: "mcp.server.disconnected", server_id = %id, "Disconnected MCP server");
        }
        removed
    }

    pub async fn disconnect_all(&self) -> usize {
        self.registry.clear().await
    }

    async fn connection(&self, id: &str) -> Result<Arc<ActiveConnection>, BridgeError> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| BridgeError::NotConnected(id.to_string()))
    }

    /// Invoke a tool by the server's own name. A server-reported error is
    /// returned as data with `is_error` set.
    pub async fn invoke_tool(&self, id: &str, call: &ToolCall) -> Result<ToolResult, BridgeError> {
        let connection = self.connection(id).await?;
        let raw = connection
            .client()
            .call_tool(call)
            .await
            .map_err(|e| BridgeError::protocol("tool call", &e))?;
        Ok(ToolResult::from_tool_response(&raw))
    }

    /// Run a prompt. Non-string argument values are passed as their JSON text.
    pub async fn run_prompt(
        &self,
        id: &str,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResult, BridgeError> {
        let connection = self.connection(id).await?;
        let arguments: HashMap<String, String> = arguments
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect();

        let raw = connection
            .client()
            .get_prompt(name, &arguments)
            .await
            .map_err(|e| BridgeError::protocol("prompt", &e))?;
        Ok(ToolResult::from_prompt_response(&raw))
    }

    pub async fn read_resource(&self, id: &str, uri: &str) -> Result<ToolResult, BridgeError> {
        let connection = self.connection(id).await?;
        let raw = connection
            .client()
            .read_resource(uri)
            .await
            .map_err(|e| BridgeError::protocol("resource read", &e))?;
        Ok(ToolResult::from_resource_response(&raw))
    }

    pub async fn list_connected_ids(&self) -> Vec<String> {
        self.registry.ids().await
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.registry.get(id).await.is_some()
    }

    /// Re-introspect a live connection.
    ///
    /// When every facet fails the connection is treated as dead: it is
    /// evicted and `None` is returned.
    pub async fn describe_connection(&self, id: &str) -> Option<ConnectedServer> {
        let connection = self.registry.get(id).await?;
        let introspection = Introspection::run(connection.client().as_ref()).await;

        if introspection.all_failed() {
            // A concurrent connect may have replaced the entry meanwhile.
            let evicted = self
                .registry
                .remove_if(id, |current| Arc::ptr_eq(current, &connection))
                .await;
            if evicted {
                warn!(name: "mcp.server.evicted", server_id = %id, "Connection unresponsive, evicting");
            }
            return None;
        }

        Some(ConnectedServer::connected(
            connection.config().clone(),
            connection.info().clone(),
            introspection.into_snapshot(id),
        ))
    }

    /// Tools of every live connection, listed now.
    ///
    /// A server whose listing fails contributes nothing to this set.
    pub async fn tool_set(&self) -> ToolSet {
        let connections = self.registry.list().await;
        let listings = futures::future::join_all(connections.iter().map(|connection| async move {
            let listing = bounded("tools", connection.client().list_tools()).await;
            (connection.server_id(), listing)
        }))
        .await;

        let mut set = ToolSet::new();
        for (server_id, listing) in listings {
            match listing {
                Ok(tools) => {
                    for tool in tools {
                        set.insert(server_id, tool);
                    }
                }
                Err(e) => {
                    warn!(name: "mcp.tools.list_failed", server_id, error = %e, "Skipping server tools for this request");
                }
            }
        }
        set
    }
}
