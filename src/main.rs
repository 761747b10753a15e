//! MCP chat gateway server.
//!
//! Entry point: loads `.env`, initializes logging and configuration, then
//! serves until Ctrl-C.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use anyhow::Context;
use dotenvy::dotenv;

use mcp_chat_gateway::{config::AppConfig, server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before anything reads the environment
    let _ = dotenv();

    telemetry::init();

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::debug!(config = ?config, "Configuration loaded");

    server::start_server(config).await
}
