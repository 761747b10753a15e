use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State, rejection::BytesRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::config::AppConfig;
use crate::llm::{ChatCompletionsDriver, ModelDriver};
use crate::mcp::{
    BridgeError, CapabilityBridge, ConnectedServer, ConnectionRegistry, RmcpConnector,
    ServerConfig, ToolCall, ToolResult, config::load_mcp_config,
};
use crate::translator::ChatRequest;
use crate::wire::{self, ErrorCode, WireEvent};

/// Largest chat body buffered before it counts as unreadable.
pub const CHAT_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Build the HTTP router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/chat/stream",
            post(chat_stream).layer(DefaultBodyLimit::max(CHAT_BODY_LIMIT)),
        )
        .route(
            "/api/mcp/servers",
            post(connect_server).get(list_servers).delete(disconnect_all),
        )
        .route(
            "/api/mcp/servers/{id}",
            get(describe_server).delete(disconnect_server),
        )
        .route("/api/mcp/servers/{id}/status", get(server_status))
        .route("/api/mcp/servers/{id}/tools/call", post(call_tool))
        .route("/api/mcp/servers/{id}/prompts/get", post(get_prompt))
        .route("/api/mcp/servers/{id}/resources/read", post(read_resource))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway and run until Ctrl-C.
pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    let settings = config.llm_settings();
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        has_api_key = settings.has_credential(),
        "LLM configuration loaded"
    );
    if !settings.has_credential() {
        warn!(
            name: "llm.config.no_api_key",
            "No upstream API key configured; chat requests will fail with NO_API_KEY"
        );
    }

    let registry = Arc::new(ConnectionRegistry::new());
    let bridge = CapabilityBridge::new(Arc::clone(&registry), Arc::new(RmcpConnector::new()));
    let driver: Arc<dyn ModelDriver> = Arc::new(ChatCompletionsDriver::new(settings.clone()));
    let state = AppState::new(settings, driver, bridge.clone());

    if let Some(path) = &config.mcp.config_file {
        connect_configured(&bridge, path).await?;
    }

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!(name: "server.shutdown", "Shutdown requested");
            // Open chat streams end with `done` so the drain can finish.
            shutdown.cancel();
        })
        .await?;

    let closed = registry.clear().await;
    info!(name: "server.stopped", closed_connections = closed, "Server stopped");
    Ok(())
}

/// Connect every active server listed in the startup file.
async fn connect_configured(bridge: &CapabilityBridge, path: &str) -> anyhow::Result<()> {
    let servers = load_mcp_config(path)
        .with_context(|| format!("failed to load MCP servers from {path}"))?
        .into_servers();

    let active: Vec<ServerConfig> = servers.into_iter().filter(|s| s.is_active).collect();
    let results = futures::future::join_all(active.into_iter().map(|s| bridge.connect(s))).await;

    for server in results {
        if server.is_connected {
            info!(
                name: "mcp.startup.connected",
                server_id = %server.config.id,
                tools = server.tools.len(),
                "Startup server connected"
            );
        } else {
            warn!(
                name: "mcp.startup.failed",
                server_id = %server.config.id,
                error = server.last_error.as_deref().unwrap_or("unknown"),
                "Startup server failed to connect"
            );
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotConnected(_) => StatusCode::NOT_FOUND,
            Self::Connection(_) | Self::Protocol { .. } => StatusCode::BAD_GATEWAY,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn healthz() -> &'static str {
    "ok"
}

/// POST /api/chat/stream - Stream a chat turn as SSE wire events.
///
/// Always answers with an event stream, even when the body could not be
/// buffered.
async fn chat_stream(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // The credential is checked before the body is parsed.
    if !state.translator.has_credential() {
        return wire::sse_response_from(vec![
            WireEvent::error(ErrorCode::NoApiKey, "No upstream API key is configured"),
            WireEvent::Done,
        ]);
    }

    let request = match body {
        Ok(body) => ChatRequest::from_body(&body),
        Err(rejection) => {
            warn!(
                name: "chat.body.unreadable",
                status = %rejection.status(),
                error = %rejection.body_text(),
                "Chat body could not be read"
            );
            ChatRequest::default()
        }
    };
    let events = state
        .translator
        .translate(request, state.shutdown.child_token());
    wire::sse_response(events)
}

/// POST /api/mcp/servers - Connect (or reconnect) a server.
async fn connect_server(
    State(state): State<AppState>,
    Json(mut config): Json<ServerConfig>,
) -> Json<ConnectedServer> {
    if config.id.trim().is_empty() {
        config.id = Uuid::new_v4().to_string();
    }
    if config.name.trim().is_empty() {
        config.name.clone_from(&config.id);
    }
    Json(state.bridge.connect(config).await)
}

/// GET /api/mcp/servers - Ids of live connections.
async fn list_servers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.bridge.list_connected_ids().await)
}

#[derive(Debug, Serialize)]
struct DisconnectAllResponse {
    disconnected: usize,
}

/// DELETE /api/mcp/servers - Disconnect everything.
async fn disconnect_all(State(state): State<AppState>) -> Json<DisconnectAllResponse> {
    Json(DisconnectAllResponse {
        disconnected: state.bridge.disconnect_all().await,
    })
}

/// GET /api/mcp/servers/{id} - Re-introspect a live connection.
async fn describe_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectedServer>, BridgeError> {
    state
        .bridge
        .describe_connection(&id)
        .await
        .map(Json)
        .ok_or(BridgeError::NotConnected(id))
}

/// DELETE /api/mcp/servers/{id}
async fn disconnect_server(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.bridge.disconnect(&id).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    id: String,
    is_connected: bool,
}

/// GET /api/mcp/servers/{id}/status
async fn server_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<StatusResponse> {
    let is_connected = state.bridge.is_connected(&id).await;
    Json(StatusResponse { id, is_connected })
}

/// POST /api/mcp/servers/{id}/tools/call
async fn call_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(call): Json<ToolCall>,
) -> Result<Json<ToolResult>, BridgeError> {
    state.bridge.invoke_tool(&id, &call).await.map(Json)
}

#[derive(Debug, Deserialize)]
struct PromptRequest {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// POST /api/mcp/servers/{id}/prompts/get
async fn get_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<ToolResult>, BridgeError> {
    state
        .bridge
        .run_prompt(&id, &req.name, &req.arguments)
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct ResourceRequest {
    uri: String,
}

/// POST /api/mcp/servers/{id}/resources/read
async fn read_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResourceRequest>,
) -> Result<Json<ToolResult>, BridgeError> {
    state.bridge.read_resource(&id, &req.uri).await.map(Json)
}
