//! Transport construction.
//!
//! [`build`] validates a [`ServerConfig`] and produces a [`Transport`]
//! description. It is pure: nothing is spawned or dialled until a
//! [`Connector`](crate::mcp::client::Connector) opens the transport.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::mcp::{
    config::{ServerConfig, TransportKind},
    error::ConfigError,
};

/// A validated transport, one variant per kind with its required fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: Url,
        headers: HashMap<String, String>,
    },
    Http {
        url: Url,
        headers: HashMap<String, String>,
    },
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Sse { .. } => TransportKind::Sse,
            Self::Http { .. } => TransportKind::Http,
        }
    }

    /// Human-readable target for logs: the command line or the URL.
    pub fn target(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            Self::Stdio { command, args, .. } => format!("{command} {}", args.join(" ")),
            Self::Sse { url, .. } | Self::Http { url, .. } => url.to_string(),
        }
    }
}

/// Build the transport for `config`, rejecting missing or malformed fields.
pub fn build(config: &ServerConfig) -> Result<Transport, ConfigError> {
    match config.transport {
        TransportKind::Stdio => {
            let command = config
                .command
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or(ConfigError::MissingCommand)?;
            Ok(Transport::Stdio {
                command: command.to_string(),
                args: config.args.clone(),
                env: config.env.clone(),
            })
        }
        TransportKind::Sse => Ok(Transport::Sse {
            url: parse_url(TransportKind::Sse, config.url.as_deref())?,
            headers: config.headers.clone(),
        }),
        TransportKind::Http => Ok(Transport::Http {
            url: parse_url(TransportKind::Http, config.url.as_deref())?,
            headers: config.headers.clone(),
        }),
    }
}

fn parse_url(kind: TransportKind, raw: Option<&str>) -> Result<Url, ConfigError> {
    let raw = raw
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(ConfigError::MissingUrl { kind })?;

    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// The transport half of a live connection.
///
/// Everything an opened transport runs in the background (the rmcp service
/// loop, SSE reader and writer tasks) is bound to this handle's token.
/// Closing is idempotent.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    kind: TransportKind,
    target: String,
    cancel: CancellationToken,
}

impl TransportHandle {
    pub fn new(kind: TransportKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn for_transport(transport: &Transport) -> Self {
        Self::new(transport.kind(), transport.target())
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
