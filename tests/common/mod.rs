//! Fakes shared by the integration suites.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::{StreamExt, stream};
use mcp_chat_gateway::{
    AppState,
    llm::{
        ChunkStream, LlmSettings, ModelChunk, ModelDriver, ModelError, ModelRequest,
        ToolInvocation,
    },
    mcp::{
        CapabilityBridge, ConnectionRegistry, Connector, McpClient, ServerInfo, Session, ToolCall,
        Transport, TransportHandle,
        types::{PromptDescriptor, ResourceDescriptor, ToolDescriptor},
    },
};
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;

// ─────────────────────────────────────────────────────────────────────────────
// MCP fakes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeClient {
    pub tools: Vec<ToolDescriptor>,
    pub fail_tools: AtomicBool,
    pub fail_prompts: AtomicBool,
    pub fail_resources: AtomicBool,
    pub hang_on_close: bool,
    pub hang_tools: AtomicBool,
    pub gate: Mutex<Option<Arc<Semaphore>>>,
    pub held: AtomicUsize,
    pub closes: AtomicUsize,
    pub calls: Mutex<Vec<ToolCall>>,
    pub prompt_args: Mutex<Vec<HashMap<String, String>>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::with_tools(&["now"])
    }

    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names.iter().map(|n| tool(n)).collect(),
            ..Self::default()
        }
    }

    pub fn hanging_on_close() -> Self {
        Self {
            hang_on_close: true,
            ..Self::new()
        }
    }

    pub fn fail_all_listings(&self) {
        self.fail_tools.store(true, Ordering::SeqCst);
        self.fail_prompts.store(true, Ordering::SeqCst);
        self.fail_resources.store(true, Ordering::SeqCst);
    }

    /// Park every later listing until the returned semaphore gets permits.
    pub fn gate_listings(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Listings currently parked on (or already released from) the gate.
    pub fn held_listings(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn hang_tool_listing(&self) {
        self.hang_tools.store(true, Ordering::SeqCst);
    }

    async fn hold(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.held.fetch_add(1, Ordering::SeqCst);
            let _permit = gate.acquire().await.unwrap();
        }
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn tool(name: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        title: None,
        description: Some(format!("{name} tool")),
        input_schema: Some(json!({ "type": "object", "properties": {} })),
    }
}

#[async_trait]
impl McpClient for FakeClient {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
        self.hold().await;
        if self.hang_tools.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.fail_tools.load(Ordering::SeqCst) {
            return Err(anyhow!("tools/list not supported"));
        }
        Ok(self.tools.clone())
    }

    async fn list_prompts(&self) -> anyhow::Result<Vec<PromptDescriptor>> {
        self.hold().await;
        if self.fail_prompts.load(Ordering::SeqCst) {
            return Err(anyhow!("prompts/list not supported"));
        }
        Ok(vec![PromptDescriptor {
            name: "summarize".to_string(),
            description: None,
            arguments: Vec::new(),
        }])
    }

    async fn list_resources(&self) -> anyhow::Result<Vec<ResourceDescriptor>> {
        self.hold().await;
        if self.fail_resources.load(Ordering::SeqCst) {
            return Err(anyhow!("resources/list not supported"));
        }
        Ok(vec![ResourceDescriptor {
            uri: "file:///notes.txt".to_string(),
            name: "notes".to_string(),
            description: None,
            mime_type: Some("text/plain".to_string()),
        }])
    }

    async fn call_tool(&self, call: &ToolCall) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(call.clone());
        match call.name.as_str() {
            "explode" => Err(anyhow!("connection reset by peer")),
            "refuse" => Ok(json!({
                "content": [{ "type": "text", "text": "not allowed" }],
                "isError": true
            })),
            name => Ok(json!({
                "content": [{ "type": "text", "text": format!("called {name}") }],
                "isError": false
            })),
        }
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> anyhow::Result<Value> {
        self.prompt_args.lock().unwrap().push(arguments.clone());
        Ok(json!({
            "messages": [
                { "role": "user", "content": { "type": "text", "text": format!("prompt {name}") } }
            ]
        }))
    }

    async fn read_resource(&self, uri: &str) -> anyhow::Result<Value> {
        Ok(json!({
            "contents": [{ "uri": uri, "mimeType": "text/plain", "text": "resource body" }]
        }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_close {
            futures::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// Connector handing out [`FakeClient`]s without any I/O.
#[derive(Debug, Default)]
pub struct FakeConnector {
    preset: Mutex<HashMap<String, Arc<FakeClient>>>,
    failing: Mutex<HashSet<String>>,
    issued: Mutex<Vec<(String, Arc<FakeClient>)>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Use `client` for the next connect of `id`.
    pub fn preset(&self, id: &str, client: FakeClient) -> Arc<FakeClient> {
        let client = Arc::new(client);
        self.preset
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::clone(&client));
        client
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every client issued for `id`, oldest first.
    pub fn clients_for(&self, id: &str) -> Vec<Arc<FakeClient>> {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|(issued_id, _)| issued_id == id)
            .map(|(_, c)| Arc::clone(c))
            .collect()
    }

    pub fn latest(&self, id: &str) -> Arc<FakeClient> {
        self.clients_for(id).pop().expect("no client issued")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        server_id: &str,
        _transport: &Transport,
        _handle: &TransportHandle,
    ) -> anyhow::Result<Session> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(server_id) {
            return Err(anyhow!("handshake refused by {server_id}"));
        }

        let preset = self.preset.lock().unwrap().remove(server_id);
        let client = preset.unwrap_or_else(|| Arc::new(FakeClient::new()));
        self.issued
            .lock()
            .unwrap()
            .push((server_id.to_string(), Arc::clone(&client)));

        Ok(Session {
            client,
            info: ServerInfo {
                name: format!("fake-{server_id}"),
                version: "1.0.0".to_string(),
                capabilities: json!({ "tools": {} }),
            },
        })
    }
}

pub fn bridge_with(
    connector: &Arc<FakeConnector>,
) -> (Arc<ConnectionRegistry>, CapabilityBridge) {
    let registry = Arc::new(ConnectionRegistry::new());
    let connector: Arc<dyn Connector> = Arc::clone(connector) as Arc<dyn Connector>;
    let bridge = CapabilityBridge::new(Arc::clone(&registry), connector);
    (registry, bridge)
}

// ─────────────────────────────────────────────────────────────────────────────
// Model fakes
// ─────────────────────────────────────────────────────────────────────────────

pub enum Turn {
    /// Yield these items, then end.
    Chunks(Vec<Result<ModelChunk, ModelError>>),
    /// Yield these items, then never end.
    Endless(Vec<ModelChunk>),
    /// Fail before streaming.
    Reject(ModelError),
}

/// Driver replaying one [`Turn`] per request.
#[derive(Default)]
pub struct ScriptedDriver {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedDriver {
    pub fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(parts: &[&str]) -> Arc<Self> {
        Self::new(vec![Turn::Chunks(
            parts.iter().map(|p| Ok(ModelChunk::text(*p))).collect(),
        )])
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelDriver for ScriptedDriver {
    async fn stream(&self, req: ModelRequest) -> Result<ChunkStream, ModelError> {
        self.requests.lock().unwrap().push(req);
        let turn = self.turns.lock().unwrap().pop_front();
        match turn {
            None => Ok(Box::pin(stream::empty::<Result<ModelChunk, ModelError>>())),
            Some(Turn::Chunks(items)) => Ok(Box::pin(stream::iter(items))),
            Some(Turn::Endless(chunks)) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(Ok)).chain(stream::pending()),
            )),
            Some(Turn::Reject(e)) => Err(e),
        }
    }
}

pub fn invocation(id: &str, name: &str) -> ToolInvocation {
    ToolInvocation {
        id: id.to_string(),
        name: name.to_string(),
        arguments: Map::new(),
    }
}

pub fn settings_with_key() -> LlmSettings {
    LlmSettings {
        api_key: Some("test-key".to_string()),
        ..LlmSettings::default()
    }
}

pub fn app_state(
    settings: LlmSettings,
    driver: Arc<ScriptedDriver>,
    connector: &Arc<FakeConnector>,
) -> AppState {
    let (_registry, bridge) = bridge_with(connector);
    AppState::new(settings, driver, bridge)
}
