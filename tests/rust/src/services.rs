//! Test harness for the gateway
//!
//! Builds an `McpGateway` over a `FakeConnector` and keeps a lifecycle event
//! subscription open from the start.

use std::sync::Arc;

use capmux_core::{
    ConnectionState, EventReceiver, LifecycleEvent, PoolConfig, ServerConfig, ServerConfigs,
};
use capmux_gateway::McpGateway;
use tracing::debug;

use crate::events;
use crate::mocks::{FakeConnector, FakeSession};
use crate::timeouts;

pub struct GatewayTestHarness {
    /// The gateway under test
    pub gateway: McpGateway,

    /// Scriptable connector behind the gateway
    pub connector: Arc<FakeConnector>,

    /// Lifecycle events since construction
    pub events: EventReceiver,
}

impl GatewayTestHarness {
    pub fn new() -> Self {
        Self::with_pool_config(PoolConfig::default())
    }

    pub fn with_pool_config(config: PoolConfig) -> Self {
        crate::init_test_tracing();
        let connector = Arc::new(FakeConnector::new());
        let gateway = McpGateway::new(connector.clone(), config);
        let events = gateway.subscribe();
        Self {
            gateway,
            connector,
            events,
        }
    }

    /// Serve `session` for `server` and register it with `config`
    pub async fn add(
        &self,
        server: &str,
        session: FakeSession,
        config: ServerConfig,
    ) -> Arc<FakeSession> {
        let session = self.connector.serve(server, session);
        self.gateway
            .add_server(server, config)
            .await
            .unwrap_or_else(|e| panic!("failed to add {server}: {e}"));
        session
    }

    /// Serve a session exposing `tools` and register it as a lenient server
    pub async fn add_with_tools(&self, server: &str, tools: &[&str]) -> Arc<FakeSession> {
        self.add(
            server,
            FakeSession::new().with_tools(tools),
            crate::fixtures::lenient(server),
        )
        .await
    }

    pub async fn initialize(&self, servers: &ServerConfigs) -> capmux_core::Result<()> {
        self.gateway.initialize_from_config(servers).await.map(|_| ())
    }

    pub fn state(&self, server: &str) -> Option<ConnectionState> {
        self.gateway.lifecycle().state_of(server)
    }

    /// Exposed tool names in catalog order
    pub async fn tool_names(&self) -> Vec<String> {
        self.gateway
            .get_all_tools()
            .await
            .unwrap_or_else(|e| panic!("tool listing failed: {e}"))
            .into_iter()
            .map(|d| d.exposed_name)
            .collect()
    }

    /// Events buffered so far
    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        events::drain_events(&mut self.events)
    }

    pub async fn wait_for_state(&mut self, server: &str, state: ConnectionState) -> LifecycleEvent {
        debug!(server, state = %state, "[TestHarness] Waiting for state");
        events::wait_for_state(&mut self.events, server, state, timeouts::LONG)
            .await
            .unwrap_or_else(|| panic!("{server} never reached {state}"))
    }

    pub async fn shutdown(&self) {
        self.gateway.shutdown().await;
    }
}

impl Default for GatewayTestHarness {
    fn default() -> Self {
        Self::new()
    }
}
