//! Capability-server configuration records.
//!
//! A [`ServerConfig`] is supplied by the caller (the UI persists it) and is the
//! only input the transport factory needs. The optional startup file uses the
//! familiar `mcpServers` layout keyed by server id:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "time": {
//!       "name": "Time",
//!       "transport": "stdio",
//!       "command": "npx",
//!       "args": ["-y", "@mcpcentral/mcp-time"]
//!     },
//!     "search": {
//!       "transport": "http",
//!       "url": "https://mcp.example.com/mcp",
//!       "headers": { "Authorization": "Bearer ${SEARCH_TOKEN}" }
//!     }
//!   }
//! }
//! ```

use std::{collections::BTreeMap, collections::HashMap, fmt, fs, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mcp::error::ConfigError;

/// Transport kinds a capability server can be reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum TransportKind {
    /// Local subprocess speaking JSON-RPC over stdin/stdout.
    Stdio,
    /// Legacy Server-Sent Events transport (GET stream + POST endpoint).
    Sse,
    /// Streamable HTTP transport.
    Http,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::UnsupportedTransport(other.to_string())),
        }
    }
}

impl TryFrom<String> for TransportKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Declarative description of one capability server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Unique, stable identifier. Filled from the map key when loaded from file.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Transport kind.
    pub transport: TransportKind,
    /// Executable for `stdio` servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for `stdio` servers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment for `stdio` servers. Values may contain `${VAR}`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Endpoint for `sse` and `http` servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Headers sent with every request to `sse` and `http` servers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    fn new(id: impl Into<String>, transport: TransportKind) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            name: id.clone(),
            id,
            transport,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// A subprocess server launched with `command`.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::new(id, TransportKind::Stdio)
        }
    }

    /// A remote server reached over `kind` at `url`.
    pub fn remote(id: impl Into<String>, kind: TransportKind, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(id, kind)
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Startup file listing servers to connect when the gateway boots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

impl McpConfig {
    /// Servers in id order, with ids taken from the map keys.
    pub fn into_servers(self) -> Vec<ServerConfig> {
        self.mcp_servers
            .into_iter()
            .map(|(key, mut config)| {
                if config.id.is_empty() {
                    config.id = key;
                }
                if config.name.is_empty() {
                    config.name.clone_from(&config.id);
                }
                config
            })
            .collect()
    }
}

pub fn load_mcp_config(path: impl AsRef<Path>) -> anyhow::Result<McpConfig> {
    let txt = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&txt)?)
}

/// Expand `${VAR}` placeholders from the process environment.
///
/// Unknown variables are left in place so a misconfigured value is visible in
/// the server's own error output rather than silently blanked.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                out.push_str("${");
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}
