//! In-memory fakes for the session ports
//!
//! `FakeSession` serves a scripted capability listing and counts every call.
//! `FakeConnector` hands out one `FakeSession` per server name and can be told
//! to fail connects.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capmux_core::{
    ConnectionError, JsonObject, McpSession, RemoteCapability, ServerConfig, SessionConnector,
    SessionError, SessionResult, ToolCallOutput, TransportFailure,
};

// ============================================================================
// FakeSession
// ============================================================================

#[derive(Default)]
pub struct FakeSession {
    tools: RwLock<Vec<RemoteCapability>>,
    prompts: RwLock<Vec<RemoteCapability>>,
    resources: RwLock<Vec<RemoteCapability>>,

    /// Error returned by every listing call
    listing_error: RwLock<Option<SessionError>>,
    /// Answer prompts/resources listing with a protocol error
    prompts_unsupported: AtomicBool,
    /// Error returned by tool calls, prompt gets and resource reads
    call_error: RwLock<Option<SessionError>>,
    call_delay: RwLock<Option<Duration>>,
    ping_error: RwLock<Option<SessionError>>,

    pub tool_calls: AtomicU32,
    pub prompt_gets: AtomicU32,
    pub resource_reads: AtomicU32,
    pub listings: AtomicU32,
    pub pings: AtomicU32,
    pub disconnects: AtomicU32,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(self, names: &[&str]) -> Self {
        *self.tools.write() = names.iter().map(|n| tool(n)).collect();
        self
    }

    pub fn with_prompts(self, names: &[&str]) -> Self {
        *self.prompts.write() = names
            .iter()
            .map(|n| RemoteCapability::new(*n).with_description(format!("Test prompt: {}", n)))
            .collect();
        self
    }

    pub fn with_resources(self, uris: &[&str]) -> Self {
        *self.resources.write() = uris
            .iter()
            .map(|uri| RemoteCapability::new(*uri).with_raw(json!({ "uri": uri, "mimeType": "text/plain" })))
            .collect();
        self
    }

    pub fn set_tools(&self, names: &[&str]) {
        *self.tools.write() = names.iter().map(|n| tool(n)).collect();
    }

    pub fn fail_listing(&self, error: Option<SessionError>) {
        *self.listing_error.write() = error;
    }

    pub fn set_prompts_unsupported(&self, unsupported: bool) {
        self.prompts_unsupported.store(unsupported, Ordering::SeqCst);
    }

    pub fn fail_calls(&self, error: Option<SessionError>) {
        *self.call_error.write() = error;
    }

    pub fn delay_calls(&self, delay: Option<Duration>) {
        *self.call_delay.write() = delay;
    }

    pub fn fail_pings(&self, error: Option<SessionError>) {
        *self.ping_error.write() = error;
    }

    pub fn tool_call_count(&self) -> u32 {
        self.tool_calls.load(Ordering::SeqCst)
    }

    fn listing(&self, items: &RwLock<Vec<RemoteCapability>>) -> SessionResult<Vec<RemoteCapability>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.listing_error.read().clone() {
            return Err(error);
        }
        Ok(items.read().clone())
    }

    async fn before_call(&self) -> SessionResult<()> {
        let delay = *self.call_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.call_error.read().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn tool(name: &str) -> RemoteCapability {
    RemoteCapability::new(name)
        .with_description(format!("Test tool: {}", name))
        .with_raw(json!({
            "name": name,
            "inputSchema": { "type": "object", "properties": {} }
        }))
}

#[async_trait]
impl McpSession for FakeSession {
    async fn list_tools(&self) -> SessionResult<Vec<RemoteCapability>> {
        self.listing(&self.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> SessionResult<ToolCallOutput> {
        self.tool_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        let args = arguments.map(Value::Object).unwrap_or(Value::Null);
        Ok(ToolCallOutput {
            content: vec![json!({ "type": "text", "text": name, "arguments": args })],
            is_error: false,
        })
    }

    async fn list_prompts(&self) -> SessionResult<Vec<RemoteCapability>> {
        if self.prompts_unsupported.load(Ordering::SeqCst) {
            return Err(SessionError::Remote("Method not found: prompts/list".into()));
        }
        self.listing(&self.prompts)
    }

    async fn get_prompt(&self, name: &str, _arguments: Option<JsonObject>) -> SessionResult<Value> {
        self.prompt_gets.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        Ok(json!({ "description": name, "messages": [] }))
    }

    async fn list_resources(&self) -> SessionResult<Vec<RemoteCapability>> {
        if self.prompts_unsupported.load(Ordering::SeqCst) {
            return Err(SessionError::Remote("Method not found: resources/list".into()));
        }
        self.listing(&self.resources)
    }

    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<Value>> {
        self.resource_reads.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        Ok(vec![json!({ "uri": uri, "text": "contents" })])
    }

    async fn ping(&self) -> SessionResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match self.ping_error.read().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// FakeConnector
// ============================================================================

/// How connects to one server should fail
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// Fail the next `n` connects with a recoverable error
    FailTimes(u32),
    /// Every connect fails with a recoverable error
    AlwaysFail,
    /// Every connect fails with a configuration error
    Misconfigured,
}

#[derive(Default)]
pub struct FakeConnector {
    sessions: DashMap<String, Arc<FakeSession>>,
    scripts: DashMap<String, ConnectScript>,
    connects: DashMap<String, u32>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the session served for `server`
    pub fn serve(&self, server: &str, session: FakeSession) -> Arc<FakeSession> {
        let session = Arc::new(session);
        self.sessions.insert(server.to_string(), session.clone());
        session
    }

    pub fn session(&self, server: &str) -> Option<Arc<FakeSession>> {
        self.sessions.get(server).map(|s| s.clone())
    }

    pub fn script(&self, server: &str, script: ConnectScript) {
        self.scripts.insert(server.to_string(), script);
    }

    pub fn clear_script(&self, server: &str) {
        self.scripts.remove(server);
    }

    pub fn connect_count(&self, server: &str) -> u32 {
        self.connects.get(server).map(|c| *c).unwrap_or(0)
    }

    fn scripted_failure(&self, server: &str) -> Option<ConnectionError> {
        let mut entry = self.scripts.get_mut(server)?;
        let refused = || ConnectionError::Transport {
            server: server.to_string(),
            transport: capmux_core::TransportKind::Stdio,
            failure: TransportFailure::ProcessExited { code: Some(1) },
        };
        match entry.value_mut() {
            ConnectScript::FailTimes(0) => None,
            ConnectScript::FailTimes(remaining) => {
                *remaining -= 1;
                Some(refused())
            }
            ConnectScript::AlwaysFail => Some(refused()),
            ConnectScript::Misconfigured => Some(ConnectionError::Configuration {
                server: server.to_string(),
                reason: "command not found".into(),
            }),
        }
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        server_name: &str,
        _config: &ServerConfig,
    ) -> Result<Arc<dyn McpSession>, ConnectionError> {
        *self.connects.entry(server_name.to_string()).or_insert(0) += 1;

        if let Some(error) = self.scripted_failure(server_name) {
            return Err(error);
        }

        let session = self
            .sessions
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::new(FakeSession::new()))
            .clone();
        Ok(session)
    }
}
