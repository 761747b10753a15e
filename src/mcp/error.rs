//! Error types for the MCP layer.

use thiserror::Error;

use crate::mcp::config::TransportKind;

/// A server configuration that cannot be turned into a transport.
///
/// Raised before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("stdio transport requires a command")]
    MissingCommand,

    #[error("{kind} transport requires a url")]
    MissingUrl { kind: TransportKind },

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),
}

/// Domain error surfaced by [`CapabilityBridge`](crate::mcp::bridge::CapabilityBridge).
///
/// Every protocol or transport failure is converted into one of these at the
/// bridge boundary, carrying a human-readable message.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No live connection for the server id.
    #[error("server '{0}' is not connected")]
    NotConnected(String),

    /// The handshake with the server failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A call against a live connection failed.
    #[error("{operation} failed: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },
}

impl BridgeError {
    pub(crate) fn protocol(operation: &'static str, source: &anyhow::Error) -> Self {
        Self::Protocol {
            operation,
            message: format!("{source:#}"),
        }
    }
}
