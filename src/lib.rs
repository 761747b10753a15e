//! MCP chat gateway
//!
//! A streaming chat backend whose model can call tools exposed by
//! independently running MCP capability servers.
//!
//! # Architecture
//!
//! - **MCP**: transport factory, connection registry and capability bridge
//! - **LLM**: Chat Completions driver and tool-loop orchestrator
//! - **Streaming**: translator from model output to typed wire events, framed as SSE
//! - **Server**: Axum HTTP surface for chat and tool management
//!
//! # Modules
//!
//! - [`mcp`]: capability-server connections
//! - [`llm`]: upstream model drivers
//! - [`translator`]: chat request → wire events
//! - [`wire`]: wire event model and SSE framing

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod llm;
pub mod mcp;
pub mod server;
pub mod telemetry;
pub mod translator;
pub mod wire;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use llm::{LlmSettings, ModelDriver, Orchestrator};
use mcp::CapabilityBridge;
use translator::StreamTranslator;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Connection management and capability calls.
    pub bridge: CapabilityBridge,
    /// Chat request → wire events.
    pub translator: StreamTranslator,
    /// Cancelled at shutdown; each chat stream holds a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        settings: LlmSettings,
        driver: Arc<dyn ModelDriver>,
        bridge: CapabilityBridge,
    ) -> Self {
        let orchestrator = Orchestrator::new(driver, bridge.clone());
        Self {
            translator: StreamTranslator::new(settings, orchestrator, bridge.clone()),
            bridge,
            shutdown: CancellationToken::new(),
        }
    }
}
