//! Process-wide store of live capability-server connections.
//!
//! The registry is constructed once at startup and shared by `Arc`. It holds
//! at most one [`ActiveConnection`] per server id. Every mutation takes the
//! registry-wide write lock and keeps it while the displaced connection is
//! closed, so a reader never sees an old and a new connection for the same id.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::mcp::{
    client::McpClient, config::ServerConfig, transport::TransportHandle, types::ServerInfo,
};

/// Upper bound on a client's graceful close before the transport is cut.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One live client + transport pair, tagged with its server id.
pub struct ActiveConnection {
    config: ServerConfig,
    info: ServerInfo,
    client: Arc<dyn McpClient>,
    transport: TransportHandle,
    connected_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("server_id", &self.config.id)
            .field("info", &self.info)
            .field("transport", &self.transport)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ActiveConnection {
    pub fn new(
        config: ServerConfig,
        info: ServerInfo,
        client: Arc<dyn McpClient>,
        transport: TransportHandle,
    ) -> Self {
        Self {
            config,
            info,
            client,
            transport,
            connected_at: Utc::now(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn client(&self) -> &Arc<dyn McpClient> {
        &self.client
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the client, then the transport. Runs once; later calls return
    /// immediately. Failures are logged, never propagated.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, self.client.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(name: "mcp.client.close_failed", server_id = %self.server_id(), error = %e, "Client close failed");
            }
            Err(_) => {
                warn!(name: "mcp.client.close_timeout", server_id = %self.server_id(), timeout_secs = CLOSE_TIMEOUT.as_secs(), "Client close timed out");
            }
        }
        self.transport.close();

        debug!(name: "mcp.connection.closed", server_id = %self.server_id(), "Connection closed");
    }
}

/// Keyed store of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<String, Arc<ActiveConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `connection`, closing any previous connection for the same id
    /// before the new one becomes visible.
    pub async fn put(&self, connection: ActiveConnection) -> Arc<ActiveConnection> {
        let connection = Arc::new(connection);
        let id = connection.server_id().to_string();

        let mut connections = self.connections.write().await;
        if let Some(previous) = connections.remove(&id) {
            info!(name: "mcp.server.replaced", server_id = %id, "Replacing existing connection");
            previous.close().await;
        }
        connections.insert(id, Arc::clone(&connection));

        connection
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ActiveConnection>> {
        self.connections.read().await.get(id).map(Arc::clone)
    }

    /// Close and delete the entry for `id`. Returns whether one existed.
    pub async fn remove(&self, id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let Some(connection) = connections.remove(id) else {
            return false;
        };
        connection.close().await;
        true
    }

    /// Like [`remove`](Self::remove), but only when the current entry for `id`
    /// satisfies `pred`. The check and the removal happen under one write lock.
    pub async fn remove_if<F>(&self, id: &str, pred: F) -> bool
    where
        F: FnOnce(&Arc<ActiveConnection>) -> bool,
    {
        let mut connections = self.connections.write().await;
        if !connections.get(id).is_some_and(pred) {
            return false;
        }
        let Some(connection) = connections.remove(id) else {
            return false;
        };
        connection.close().await;
        true
    }

    /// Snapshot of every live connection, in id order.
    pub async fn list(&self) -> Vec<Arc<ActiveConnection>> {
        self.connections.read().await.values().map(Arc::clone).collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Close and delete every entry. Returns how many were closed.
    pub async fn clear(&self) -> usize {
        let mut connections = self.connections.write().await;
        let drained = std::mem::take(&mut *connections);
        let count = drained.len();
        for connection in drained.into_values() {
            connection.close().await;
        }
        if count > 0 {
            info!(name: "mcp.registry.cleared", count, "Closed all connections");
        }
        count
    }
}
