//! ConnectionPoolManager - pool-level policy over the lifecycle manager
//!
//! Enforces `maxPoolSize`, hands out per-server clients, warms connections
//! up and aggregates statistics. Connection state itself lives in
//! [`ConnectionLifecycleManager`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capmux_core::{
    ConnectionError, ConnectionState, Error, EventReceiver, JsonObject, PoolConfig,
    RemoteCapability, Result, ServerConfig, ServerConfigs, ServerFailure, SessionConnector,
    ToolCallOutput,
};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{mean_duration, ServerConnection};
use super::lifecycle::{
    ConnectionLifecycleManager, ConnectionRecord, FailedConnection, InitializeReport,
};

/// Options for [`ConnectionPoolManager::get_client`]
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Per-request timeout; defaults to the server's `requestTimeoutMs`
    pub timeout: Option<Duration>,
    /// Refuse degraded or unhealthy connections
    pub require_healthy: bool,
}

impl ClientOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn healthy_only(mut self) -> Self {
        self.require_healthy = true;
        self
    }
}

/// Handle to one usable server connection
#[derive(Clone)]
pub struct PooledClient {
    record: Arc<ConnectionRecord>,
    connection: Arc<ServerConnection>,
    timeout: Duration,
}

impl PooledClient {
    pub fn server_name(&self) -> &str {
        self.record.name()
    }

    pub fn state(&self) -> ConnectionState {
        self.record.state()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.connection.session_id()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_healthy(&self) -> bool {
        self.connection.is_healthy()
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteCapability>> {
        Ok(self.connection.with_timeout(self.timeout).list_tools().await?)
    }

    pub async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<ToolCallOutput> {
        Ok(self
            .connection
            .with_timeout(self.timeout)
            .call_tool(name, arguments)
            .await?)
    }

    pub async fn list_prompts(&self) -> Result<Vec<RemoteCapability>> {
        Ok(self.connection.with_timeout(self.timeout).list_prompts().await?)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<JsonObject>) -> Result<Value> {
        Ok(self
            .connection
            .with_timeout(self.timeout)
            .get_prompt(name, arguments)
            .await?)
    }

    pub async fn list_resources(&self) -> Result<Vec<RemoteCapability>> {
        Ok(self.connection.with_timeout(self.timeout).list_resources().await?)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>> {
        Ok(self
            .connection
            .with_timeout(self.timeout)
            .read_resource(uri)
            .await?)
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.connection.with_timeout(self.timeout).ping().await?)
    }
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("server", &self.server_name())
            .field("state", &self.state())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Result of [`ConnectionPoolManager::warmup`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmupReport {
    pub warmed: Vec<String>,
    pub failed: Vec<ServerFailure>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStatistics {
    pub total_connections: usize,
    /// Ready or Degraded
    pub active_connections: usize,
    pub healthy_connections: usize,
    pub degraded_connections: usize,
    pub recovering_connections: usize,
    pub failed_connections: usize,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Option<Duration>,
    pub utilization_percent: f64,
    pub max_pool_size: usize,
    pub uptime: Duration,
}

pub struct ConnectionPoolManager {
    lifecycle: Arc<ConnectionLifecycleManager>,
    config: RwLock<PoolConfig>,
    started_at: Instant,
    shutting_down: AtomicBool,
}

impl ConnectionPoolManager {
    pub fn new(connector: Arc<dyn SessionConnector>, config: PoolConfig) -> Self {
        Self::with_lifecycle(Arc::new(ConnectionLifecycleManager::new(connector)), config)
    }

    pub fn with_lifecycle(lifecycle: Arc<ConnectionLifecycleManager>, config: PoolConfig) -> Self {
        Self {
            lifecycle,
            config: RwLock::new(config),
            started_at: Instant::now(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn lifecycle(&self) -> &Arc<ConnectionLifecycleManager> {
        &self.lifecycle
    }

    pub fn config(&self) -> PoolConfig {
        self.config.read().clone()
    }

    fn ensure_open(&self, server: &str) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ConnectionError::ShuttingDown {
                server: server.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Start every configured server, honoring the pool size limit
    ///
    /// Invalid or overflowing entries are rejected before anything starts:
    /// strict ones fail the call, lenient ones end up in `report.failed`.
    pub async fn initialize_from_config(&self, configs: &ServerConfigs) -> Result<InitializeReport> {
        let pool = self.config();
        let mut admitted = ServerConfigs::new();
        let mut rejected = Vec::new();
        let mut strict_rejected = Vec::new();

        for (name, config) in configs.iter() {
            self.ensure_open(name)?;
            let refusal = match config.validate_as(name) {
                Err(e) => Some(e),
                Ok(()) if self.lifecycle.len() + admitted.len() >= pool.max_pool_size => {
                    Some(Error::PoolExhausted {
                        max: pool.max_pool_size,
                    })
                }
                Ok(()) => None,
            };
            let Some(error) = refusal else {
                admitted.push(name.clone(), config.clone());
                continue;
            };

            let failure = ServerFailure::new(name.clone(), error);
            if config.is_strict() {
                strict_rejected.push(failure);
            } else {
                warn!(
                    server = %name,
                    error = %failure.error,
                    "[PoolManager] Server not admitted"
                );
                rejected.push(failure);
            }
        }

        if !strict_rejected.is_empty() {
            return Err(Error::StartupFailed {
                failures: strict_rejected,
            });
        }

        let mut report = self
            .lifecycle
            .initialize_within(&admitted, pool.max_pool_size)
            .await?;
        report.failed.extend(rejected);

        if pool.warmup_on_start {
            let warmup = self.warmup().await;
            debug!(
                warmed = warmup.warmed.len(),
                failed = warmup.failed.len(),
                "[PoolManager] Startup warmup finished"
            );
        }
        Ok(report)
    }

    /// Add one server at runtime
    ///
    /// A server that is already registered but Failed is restarted instead.
    pub async fn add_server(
        &self,
        name: impl Into<String>,
        config: ServerConfig,
    ) -> Result<ConnectionState> {
        let name = name.into();
        self.ensure_open(&name)?;
        config.validate_as(&name)?;

        let max = self.config.read().max_pool_size;
        self.lifecycle.add_server_within(name, config, max).await
    }

    pub async fn remove_server(&self, name: &str) -> Result<()> {
        let timeout = self.config.read().shutdown_timeout();
        self.lifecycle.remove_server(name, timeout).await
    }

    /// Client for one server
    ///
    /// Fails fast instead of waiting for a connection to come back.
    pub fn get_client(&self, name: &str, options: ClientOptions) -> Result<PooledClient> {
        let record = self
            .lifecycle
            .get(name)
            .ok_or_else(|| Error::UnknownServer(name.to_string()))?;

        let state = record.state();
        if !state.is_usable() {
            return Err(Error::NotReady {
                server: name.to_string(),
                state,
            });
        }

        let connection = record.connection();
        if options.require_healthy && (state == ConnectionState::Degraded || !connection.is_healthy())
        {
            return Err(Error::Unhealthy {
                server: name.to_string(),
            });
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| connection.config().request_timeout());
        Ok(PooledClient {
            record,
            connection,
            timeout,
        })
    }

    /// One client per usable connection, in registration order
    pub fn get_clients(&self) -> Vec<PooledClient> {
        self.lifecycle
            .usable_connections()
            .into_iter()
            .map(|record| {
                let connection = record.connection();
                let timeout = connection.config().request_timeout();
                PooledClient {
                    record,
                    connection,
                    timeout,
                }
            })
            .collect()
    }

    /// Ping every Ready connection concurrently
    pub async fn warmup(&self) -> WarmupReport {
        let started = Instant::now();
        let timeout = self.config.read().warmup_timeout();
        let records = self.lifecycle.ready_connections();

        let pings = records.iter().map(|record| async move {
            let result = record.connection().with_timeout(timeout).ping().await;
            (record.name().to_string(), result)
        });

        let mut report = WarmupReport::default();
        for (name, result) in join_all(pings).await {
            match result {
                Ok(()) => report.warmed.push(name),
                Err(e) => {
                    warn!(server = %name, error = %e, "[PoolManager] Warmup ping failed");
                    report.failed.push(ServerFailure::new(name, e));
                }
            }
        }
        report.elapsed = started.elapsed();
        info!(
            warmed = report.warmed.len(),
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "[PoolManager] Warmup complete"
        );
        report
    }

    pub fn statistics(&self) -> PoolStatistics {
        let max_pool_size = self.config.read().max_pool_size;
        let mut stats = PoolStatistics {
            max_pool_size,
            uptime: self.started_at.elapsed(),
            ..Default::default()
        };

        let mut timed_total = Duration::ZERO;
        let mut timed_requests = 0u64;
        for record in self.lifecycle.records() {
            stats.total_connections += 1;
            let connection = record.connection();
            match record.state() {
                ConnectionState::Ready => {
                    stats.active_connections += 1;
                    if connection.is_healthy() {
                        stats.healthy_connections += 1;
                    }
                }
                ConnectionState::Degraded => {
                    stats.active_connections += 1;
                    stats.degraded_connections += 1;
                }
                ConnectionState::Recovering => stats.recovering_connections += 1,
                ConnectionState::Failed => stats.failed_connections += 1,
                _ => {}
            }

            let metrics = connection.metrics();
            stats.successful_requests += metrics.successful_requests;
            stats.failed_requests += metrics.failed_requests;
            timed_total += metrics.total_response_time;
            timed_requests += metrics.timed_requests;
        }

        stats.average_response_time = mean_duration(timed_total, timed_requests);
        stats.utilization_percent = stats.total_connections as f64 / max_pool_size.max(1) as f64 * 100.0;
        stats
    }

    /// Replace the pool settings
    ///
    /// A smaller `maxPoolSize` does not evict live connections; it only
    /// limits servers added afterwards.
    pub fn update_config(&self, config: PoolConfig) -> Result<()> {
        if config.max_pool_size == 0 {
            return Err(Error::Config("maxPoolSize must be greater than zero".into()));
        }
        let live = self.lifecycle.len();
        if live > config.max_pool_size {
            warn!(
                live,
                max_pool_size = config.max_pool_size,
                "[PoolManager] Pool already above new limit"
            );
        }
        info!(
            max_pool_size = config.max_pool_size,
            warmup_on_start = config.warmup_on_start,
            "[PoolManager] Config updated"
        );
        *self.config.write() = config;
        Ok(())
    }

    pub fn is_server_healthy(&self, name: &str) -> bool {
        self.lifecycle
            .get(name)
            .is_some_and(|record| record.state() == ConnectionState::Ready && record.connection().is_healthy())
    }

    pub fn server_names(&self) -> Vec<String> {
        self.lifecycle.server_names()
    }

    pub fn failed_connections(&self) -> Vec<FailedConnection> {
        self.lifecycle.failed_connections()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.lifecycle.subscribe()
    }

    /// Close every connection; the pool stays usable
    pub async fn disconnect_all(&self) {
        let timeout = self.config.read().shutdown_timeout();
        self.lifecycle.shutdown_all(timeout).await;
    }

    /// Close every connection and refuse new servers
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let stats = self.statistics();
        info!(
            connections = stats.total_connections,
            uptime_secs = stats.uptime.as_secs(),
            "[PoolManager] Shutting down"
        );
        self.disconnect_all().await;
        info!("[PoolManager] Shutdown complete");
    }
}
