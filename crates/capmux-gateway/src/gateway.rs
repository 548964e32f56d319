//! McpGateway - the public entry point
//!
//! Wires a connector into the lifecycle manager, pool manager and
//! aggregator. Nothing here is global: every gateway owns its own state.

use std::sync::Arc;

use capmux_core::{
    CapabilityDescriptor, ConnectionState, EventReceiver, GatewayConfig, JsonObject, PoolConfig,
    Result, ServerConfig, ServerConfigs, SessionConnector, ToolCallOutput,
};
use serde_json::Value;
use tracing::info;

use crate::pool::{
    ClientOptions, ConnectionLifecycleManager, ConnectionPoolManager, FailedConnection,
    InitializeReport, PoolStatistics, PooledClient, ToolAggregator, WarmupReport,
};

pub struct McpGateway {
    pool: Arc<ConnectionPoolManager>,
    aggregator: ToolAggregator,
}

impl McpGateway {
    pub fn new(connector: Arc<dyn SessionConnector>, config: PoolConfig) -> Self {
        let pool = Arc::new(ConnectionPoolManager::new(connector, config));
        // Subscribe before any server connects so no event is missed
        let aggregator = ToolAggregator::new(pool.clone());
        Self { pool, aggregator }
    }

    /// Gateway with the pool settings of `config`; servers are started by
    /// [`McpGateway::initialize`]
    pub fn from_config(connector: Arc<dyn SessionConnector>, config: &GatewayConfig) -> Self {
        Self::new(connector, config.pool.clone())
    }

    pub fn pool(&self) -> &Arc<ConnectionPoolManager> {
        &self.pool
    }

    pub fn lifecycle(&self) -> &Arc<ConnectionLifecycleManager> {
        self.pool.lifecycle()
    }

    pub fn aggregator(&self) -> &ToolAggregator {
        &self.aggregator
    }

    /// Apply the pool settings of `config` and start its servers
    pub async fn initialize(&self, config: &GatewayConfig) -> Result<InitializeReport> {
        self.pool.update_config(config.pool.clone())?;
        self.initialize_from_config(&config.servers).await
    }

    pub async fn initialize_from_config(&self, servers: &ServerConfigs) -> Result<InitializeReport> {
        let report = self.pool.initialize_from_config(servers).await?;
        info!(
            ready = report.ready.len(),
            recovering = report.recovering.len(),
            failed = report.failed.len(),
            "[Gateway] Initialized"
        );
        Ok(report)
    }

    pub async fn add_server(
        &self,
        name: impl Into<String>,
        config: ServerConfig,
    ) -> Result<ConnectionState> {
        self.pool.add_server(name, config).await
    }

    /// Remove a server; its capabilities disappear before the transport closes
    pub async fn remove_server(&self, name: &str) -> Result<()> {
        let lifecycle = self.pool.lifecycle();
        let record = lifecycle.begin_shutdown(name).await?;
        self.aggregator.purge_server(name).await;
        lifecycle
            .finish_shutdown(&record, self.pool.config().shutdown_timeout())
            .await;
        Ok(())
    }

    pub async fn restart_server(&self, name: &str) -> Result<ConnectionState> {
        self.pool.lifecycle().restart(name).await
    }

    pub async fn get_all_tools(&self) -> Result<Vec<CapabilityDescriptor>> {
        self.aggregator.get_all_tools().await
    }

    pub async fn get_all_prompts(&self) -> Result<Vec<CapabilityDescriptor>> {
        self.aggregator.get_all_prompts().await
    }

    pub async fn get_all_resources(&self) -> Result<Vec<CapabilityDescriptor>> {
        self.aggregator.get_all_resources().await
    }

    pub async fn execute_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<ToolCallOutput> {
        self.aggregator.execute_tool(name, arguments).await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<JsonObject>) -> Result<Value> {
        self.aggregator.get_prompt(name, arguments).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>> {
        self.aggregator.read_resource(uri).await
    }

    pub fn get_client(&self, name: &str, options: ClientOptions) -> Result<PooledClient> {
        self.pool.get_client(name, options)
    }

    pub fn get_clients(&self) -> Vec<PooledClient> {
        self.pool.get_clients()
    }

    pub fn get_server_names(&self) -> Vec<String> {
        self.pool.server_names()
    }

    pub fn is_server_healthy(&self, name: &str) -> bool {
        self.pool.is_server_healthy(name)
    }

    pub fn get_failed_connections(&self) -> Vec<FailedConnection> {
        self.pool.failed_connections()
    }

    pub fn get_statistics(&self) -> PoolStatistics {
        self.pool.statistics()
    }

    pub async fn warmup(&self) -> WarmupReport {
        self.pool.warmup().await
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.pool.subscribe()
    }

    pub async fn disconnect_all(&self) {
        self.pool.disconnect_all().await;
        self.aggregator.invalidate();
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.aggregator.invalidate();
    }
}
