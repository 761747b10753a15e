//! Model Context Protocol (MCP) connection management.
//!
//! Capability servers are reached over three transports (stdio subprocess,
//! legacy SSE, streamable HTTP). The pieces, leaf first:
//!
//! - [`transport::build`] validates a [`ServerConfig`] into a [`Transport`].
//! - [`client::Connector`] opens a transport and performs the handshake.
//! - [`ConnectionRegistry`] holds at most one live connection per server id.
//! - [`CapabilityBridge`] connects, introspects, invokes and describes.
//!
//! # Tool Namespacing
//!
//! Tools offered to the model are namespaced by server id:
//! `server_id__tool_name` (e.g., `time__now`, `search__web_search`).

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod sse_transport;
pub mod tools;
pub mod transport;
pub mod types;

pub use bridge::CapabilityBridge;
pub use client::{Connector, McpClient, RmcpConnector, Session};
pub use config::{ServerConfig, TransportKind};
pub use error::{BridgeError, ConfigError};
pub use registry::{ActiveConnection, ConnectionRegistry};
pub use tools::{ToolRoute, ToolSet};
pub use transport::{Transport, TransportHandle};
pub use types::{ConnectedServer, ServerInfo, ToolCall, ToolResult};
