//! ServerConnection - one supervised session to one server
//!
//! Owns the session, its circuit breaker and its health monitor. Every
//! request-shaped call goes through the breaker and a per-request timeout,
//! so a tripped breaker or a hung server affects all of them uniformly.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capmux_core::{
    ConnectionError, JsonObject, McpSession, RemoteCapability, ServerConfig, SessionConnector,
    SessionError, SessionResult, ToolCallOutput,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::circuit_breaker::{BreakerError, CircuitBreaker};
use super::health::HealthMonitor;

/// Upper bound on a single transport teardown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Request counters for one connection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestMetrics {
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Requests that reached the transport; circuit rejections are not timed
    pub timed_requests: u64,
    pub total_response_time: Duration,
    pub average_response_time: Option<Duration>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Mean of `count` samples summing to `total`, `None` without samples
pub(crate) fn mean_duration(total: Duration, count: u64) -> Option<Duration> {
    let nanos = total.as_nanos().checked_div(u128::from(count))?;
    Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
}

#[derive(Default)]
struct MetricsState {
    successful: u64,
    failed: u64,
    timed: u64,
    total_response: Duration,
    last_success_at: Option<DateTime<Utc>>,
}

/// Decrements the in-flight counter when a request ends
struct InFlight<'a> {
    connection: &'a ServerConnection,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.connection.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.connection.drained.notify_waiters();
        }
    }
}

pub struct ServerConnection {
    name: String,
    config: ServerConfig,
    connector: Arc<dyn SessionConnector>,
    session: RwLock<Option<Arc<dyn McpSession>>>,
    session_id: RwLock<Option<Uuid>>,
    /// Serializes connect / reconnect / lazy re-establish
    connect_lock: tokio::sync::Mutex<()>,
    breaker: CircuitBreaker,
    health: HealthMonitor,
    in_flight: AtomicUsize,
    drained: Notify,
    shutting_down: AtomicBool,
    metrics: Mutex<MetricsState>,
}

impl ServerConnection {
    pub fn new(
        name: impl Into<String>,
        config: ServerConfig,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), config.circuit_breaker.clone()),
            health: HealthMonitor::new(name.clone(), config.health_check.clone()),
            name,
            config,
            connector,
            session: RwLock::new(None),
            session_id: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            shutting_down: AtomicBool::new(false),
            metrics: Mutex::new(MetricsState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Identifier of the current session, regenerated on every (re)connect
    pub fn session_id(&self) -> Option<Uuid> {
        *self.session_id.read()
    }

    pub fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }

    /// Latest health reading of a connected session
    pub fn is_healthy(&self) -> bool {
        self.is_connected() && self.health.is_healthy()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> RequestMetrics {
        let state = self.metrics.lock();
        RequestMetrics {
            successful_requests: state.successful,
            failed_requests: state.failed,
            timed_requests: state.timed,
            total_response_time: state.total_response,
            average_response_time: mean_duration(state.total_response, state.timed),
            last_success_at: state.last_success_at,
        }
    }

    // ========================================================================
    // Session management
    // ========================================================================

    /// Establish the session, bounded by the connect timeout
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let _guard = self.connect_lock.lock().await;
        self.establish().await
    }

    /// Drop the current session (best effort) and establish a new one
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let _guard = self.connect_lock.lock().await;
        self.teardown().await;
        self.establish().await
    }

    /// Active session, re-established lazily if it was lost
    ///
    /// Goes through the circuit breaker like any other request.
    pub async fn get_session(&self) -> Result<Arc<dyn McpSession>, ConnectionError> {
        self.ensure_open()?;
        let outcome = self.breaker.execute(|| self.session_or_connect()).await;
        outcome.map_err(|e| self.breaker_error(e))
    }

    /// Stop the health monitor and drop the session without reconnecting
    pub async fn suspend(&self) {
        let _guard = self.connect_lock.lock().await;
        self.teardown().await;
    }

    async fn establish(&self) -> Result<(), ConnectionError> {
        let timeout = self.config.connect_timeout();
        debug!(
            server = %self.name,
            transport = %self.config.transport_kind(),
            target = %self.config.transport.describe(),
            "[ServerConnection] Connecting"
        );

        let session =
            match tokio::time::timeout(timeout, self.connector.connect(&self.name, &self.config))
                .await
            {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(ConnectionError::ConnectionTimeout {
                        server: self.name.clone(),
                        timeout,
                    })
                }
            };

        let session_id = Uuid::new_v4();
        *self.session.write() = Some(session.clone());
        *self.session_id.write() = Some(session_id);
        self.health.reset();
        self.health.start(session);
        info!(server = %self.name, session_id = %session_id, "[ServerConnection] Connected");
        Ok(())
    }

    async fn teardown(&self) {
        self.health.stop();
        let session = self.session.write().take();
        self.session_id.write().take();
        if let Some(session) = session {
            match tokio::time::timeout(DISCONNECT_TIMEOUT, session.disconnect()).await {
                Ok(Ok(())) => debug!(server = %self.name, "[ServerConnection] Session closed"),
                Ok(Err(e)) => {
                    debug!(server = %self.name, error = %e, "[ServerConnection] Disconnect failed")
                }
                Err(_) => warn!(server = %self.name, "[ServerConnection] Disconnect timed out"),
            }
        }
    }

    async fn session_or_connect(&self) -> Result<Arc<dyn McpSession>, ConnectionError> {
        if let Some(session) = self.session.read().clone() {
            return Ok(session);
        }
        let _guard = self.connect_lock.lock().await;
        if let Some(session) = self.session.read().clone() {
            return Ok(session);
        }
        self.ensure_open()?;
        info!(server = %self.name, "[ServerConnection] Re-establishing lost session");
        self.establish().await?;
        self.session.read().clone().ok_or_else(|| ConnectionError::ConnectionLost {
            server: self.name.clone(),
            reason: "session dropped during connect".to_string(),
        })
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Request scope using the configured request timeout
    pub fn requests(&self) -> RequestScope<'_> {
        self.with_timeout(self.config.request_timeout())
    }

    /// Request scope with an explicit per-request timeout
    pub fn with_timeout(&self, timeout: Duration) -> RequestScope<'_> {
        RequestScope {
            connection: self,
            timeout,
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteCapability>, ConnectionError> {
        self.requests().list_tools().await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<ToolCallOutput, ConnectionError> {
        self.requests().call_tool(name, arguments).await
    }

    pub async fn list_prompts(&self) -> Result<Vec<RemoteCapability>, ConnectionError> {
        self.requests().list_prompts().await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<Value, ConnectionError> {
        self.requests().get_prompt(name, arguments).await
    }

    pub async fn list_resources(&self) -> Result<Vec<RemoteCapability>, ConnectionError> {
        self.requests().list_resources().await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>, ConnectionError> {
        self.requests().read_resource(uri).await
    }

    pub async fn ping(&self) -> Result<(), ConnectionError> {
        self.requests().ping().await
    }

    async fn request<T, F, Fut>(
        &self,
        operation: &'static str,
        timeout: Duration,
        call: F,
    ) -> Result<T, ConnectionError>
    where
        F: FnOnce(Arc<dyn McpSession>) -> Fut,
        Fut: Future<Output = SessionResult<T>>,
    {
        let _in_flight = self.enter()?;
        let started = Instant::now();

        let this = self;
        let outcome = self
            .breaker
            .execute(move || async move {
                let session = this.session_or_connect().await?;
                match tokio::time::timeout(timeout, call(session)).await {
                    Ok(Ok(value)) => Ok(Ok(value)),
                    // The server answered; it is alive even if the call failed
                    Ok(Err(SessionError::Remote(message))) => Ok(Err(ConnectionError::Remote {
                        server: this.name.clone(),
                        message,
                    })),
                    Ok(Err(SessionError::Closed)) => {
                        this.session.write().take();
                        Err(ConnectionError::ConnectionLost {
                            server: this.name.clone(),
                            reason: format!("session closed during {}", operation),
                        })
                    }
                    Ok(Err(e)) => Err(ConnectionError::from_session(
                        &this.name,
                        this.config.transport_kind(),
                        e,
                    )),
                    Err(_) => Err(ConnectionError::RequestTimeout {
                        server: this.name.clone(),
                        operation: operation.to_string(),
                        timeout,
                    }),
                }
            })
            .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(e) => Err(self.breaker_error(e)),
        };
        self.record(&result, started.elapsed());

        if let Err(e) = &result {
            debug!(
                server = %self.name,
                operation,
                error_kind = e.kind(),
                error = %e,
                "[ServerConnection] Request failed"
            );
        }
        result
    }

    fn breaker_error(&self, error: BreakerError<ConnectionError>) -> ConnectionError {
        match error {
            BreakerError::Inner(e) => e,
            BreakerError::Open {
                retry_after,
                consecutive_failures,
            } => ConnectionError::CircuitOpen {
                server: self.name.clone(),
                retry_after,
                consecutive_failures,
            },
        }
    }

    fn record<T>(&self, result: &Result<T, ConnectionError>, elapsed: Duration) {
        let mut state = self.metrics.lock();
        match result {
            Ok(_) => {
                state.successful += 1;
                state.last_success_at = Some(Utc::now());
            }
            Err(_) => state.failed += 1,
        }
        // Rejections never reached the server
        if !matches!(result, Err(ConnectionError::CircuitOpen { .. })) {
            state.timed += 1;
            state.total_response += elapsed;
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.is_shutting_down() {
            return Err(ConnectionError::ShuttingDown {
                server: self.name.clone(),
            });
        }
        Ok(())
    }

    fn enter(&self) -> Result<InFlight<'_>, ConnectionError> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight { connection: self };
        self.ensure_open()?;
        Ok(guard)
    }

    /// Reject new requests from now on
    pub fn request_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!(
                server = %self.name,
                in_flight = self.in_flight(),
                "[ServerConnection] Shutdown requested"
            );
        }
    }

    /// Wait for in-flight requests (up to `timeout`), then close the transport
    pub async fn wait_for_shutdown(&self, timeout: Duration) {
        let drained = async {
            loop {
                let notified = self.drained.notified();
                if self.in_flight() == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(timeout, drained).await.is_err() {
            warn!(
                server = %self.name,
                in_flight = self.in_flight(),
                "[ServerConnection] Shutdown timeout, closing with requests in flight"
            );
        }

        let _guard = self.connect_lock.lock().await;
        self.teardown().await;
        info!(server = %self.name, "[ServerConnection] Closed");
    }

    /// Graceful close: stop accepting, drain, tear down
    pub async fn shutdown(&self, timeout: Duration) {
        self.request_shutdown();
        self.wait_for_shutdown(timeout).await;
    }
}

/// Requests against one connection with a fixed timeout
#[derive(Clone, Copy)]
pub struct RequestScope<'a> {
    connection: &'a ServerConnection,
    timeout: Duration,
}

impl RequestScope<'_> {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteCapability>, ConnectionError> {
        self.connection
            .request("list_tools", self.timeout, |s| async move { s.list_tools().await })
            .await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<ToolCallOutput, ConnectionError> {
        self.connection
            .request("call_tool", self.timeout, |s| async move {
                s.call_tool(name, arguments).await
            })
            .await
    }

    pub async fn list_prompts(&self) -> Result<Vec<RemoteCapability>, ConnectionError> {
        self.connection
            .request("list_prompts", self.timeout, |s| async move {
                s.list_prompts().await
            })
            .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<Value, ConnectionError> {
        self.connection
            .request("get_prompt", self.timeout, |s| async move {
                s.get_prompt(name, arguments).await
            })
            .await
    }

    pub async fn list_resources(&self) -> Result<Vec<RemoteCapability>, ConnectionError> {
        self.connection
            .request("list_resources", self.timeout, |s| async move {
                s.list_resources().await
            })
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>, ConnectionError> {
        self.connection
            .request("read_resource", self.timeout, |s| async move {
                s.read_resource(uri).await
            })
            .await
    }

    pub async fn ping(&self) -> Result<(), ConnectionError> {
        self.connection
            .request("ping", self.timeout, |s| async move { s.ping().await })
            .await
    }
}
