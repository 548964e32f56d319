//! ConnectionLifecycleManager - owns every connection record
//!
//! State machine per server (see `ConnectionState::can_transition_to`):
//! - Connecting: initial connect in progress
//! - Ready / Degraded: driven by the health monitor through a supervisor task
//! - Recovering: reconnect loop with exponential backoff
//! - Failed: terminal until `restart` / `add_server`
//! - ShuttingDown → Closed: two-phase removal
//!
//! Transitions for one server are serialized by the record's transition
//! lock; each one emits exactly one `LifecycleEvent`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use capmux_core::{
    should_attempt_recovery, ConnectionError, ConnectionState, Error, EventBus, EventReceiver,
    EventSender, LifecycleEvent, Result, ServerConfig, ServerConfigs, ServerFailure,
    SessionConnector, StateTransition,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::ServerConnection;
use super::health::HealthStatus;

/// Connect attempts remembered per record
const ATTEMPT_HISTORY: usize = 16;

/// One connect or reconnect attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectAttempt {
    pub at: DateTime<Utc>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl ConnectAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A server whose connection is failed or recovering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedConnection {
    pub server_name: String,
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub attempts: usize,
}

/// Outcome of [`ConnectionLifecycleManager::initialize`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitializeReport {
    pub ready: Vec<String>,
    pub recovering: Vec<String>,
    pub failed: Vec<ServerFailure>,
}

impl InitializeReport {
    pub fn total(&self) -> usize {
        self.ready.len() + self.recovering.len() + self.failed.len()
    }
}

// ============================================================================
// ConnectionRecord
// ============================================================================

pub struct ConnectionRecord {
    name: String,
    config: RwLock<ServerConfig>,
    connection: RwLock<Arc<ServerConnection>>,
    state: RwLock<ConnectionState>,
    last_error: RwLock<Option<ConnectionError>>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    attempts: Mutex<VecDeque<ConnectAttempt>>,
    transition_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    events: EventSender,
    created_at: DateTime<Utc>,
}

impl ConnectionRecord {
    fn new(name: String, connection: ServerConnection, events: EventSender) -> Self {
        Self {
            config: RwLock::new(connection.config().clone()),
            connection: RwLock::new(Arc::new(connection)),
            name,
            state: RwLock::new(ConnectionState::Connecting),
            last_error: RwLock::new(None),
            connected_at: RwLock::new(None),
            attempts: Mutex::new(VecDeque::with_capacity(ATTEMPT_HISTORY)),
            transition_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
            events,
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn config(&self) -> ServerConfig {
        self.config.read().clone()
    }

    pub fn connection(&self) -> Arc<ServerConnection> {
        self.connection.read().clone()
    }

    pub fn last_error(&self) -> Option<ConnectionError> {
        self.last_error.read().clone()
    }

    /// Latest successful connect or request
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        let connected = *self.connected_at.read();
        let requested = self.connection().metrics().last_success_at;
        connected.max(requested)
    }

    /// Most recent connect attempts, oldest first
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().iter().cloned().collect()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn record_attempt(&self, elapsed: Duration, result: &std::result::Result<(), ConnectionError>) {
        let attempt = ConnectAttempt {
            at: Utc::now(),
            elapsed,
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        {
            let mut attempts = self.attempts.lock();
            if attempts.len() == ATTEMPT_HISTORY {
                attempts.pop_front();
            }
            attempts.push_back(attempt);
        }
        match result {
            Ok(()) => *self.connected_at.write() = Some(Utc::now()),
            Err(e) => *self.last_error.write() = Some(e.clone()),
        }
    }

    /// Apply `to` only when the current state satisfies `from`
    ///
    /// Returns the previous state when the transition happened.
    async fn transition_if(
        &self,
        from: impl FnOnce(ConnectionState) -> bool,
        to: ConnectionState,
        error: Option<String>,
    ) -> Option<ConnectionState> {
        let _guard = self.transition_lock.lock().await;
        let current = self.state();
        if !from(current) {
            debug!(
                server = %self.name,
                state = %current,
                target = %to,
                "[LifecycleManager] Transition skipped"
            );
            return None;
        }
        match self.apply(current, to, error) {
            Ok(()) => Some(current),
            Err(e) => {
                warn!(server = %self.name, error = %e, "[LifecycleManager] Transition rejected");
                None
            }
        }
    }

    /// Apply `to`, failing on an undefined edge
    async fn transition(&self, to: ConnectionState, error: Option<String>) -> Result<ConnectionState> {
        let _guard = self.transition_lock.lock().await;
        let current = self.state();
        self.apply(current, to, error)?;
        Ok(current)
    }

    fn apply(&self, from: ConnectionState, to: ConnectionState, error: Option<String>) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                server: self.name.clone(),
                from,
                to,
            });
        }
        *self.state.write() = to;
        info!(
            server = %self.name,
            from = %from,
            state = %to,
            "[LifecycleManager] State changed"
        );
        self.events.emit(LifecycleEvent::from_transition(StateTransition::new(
            self.name.clone(),
            from,
            to,
            error,
        )));
        Ok(())
    }

    fn set_supervisor(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.supervisor.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_supervisor(&self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Supervision and recovery
// ============================================================================

fn spawn_supervisor(record: &Arc<ConnectionRecord>, recover_first: bool) {
    let task_record = record.clone();
    let handle = tokio::spawn(async move {
        supervise(task_record, recover_first).await;
    });
    record.set_supervisor(handle);
}

/// Follow health changes until the connection fails or shuts down
async fn supervise(record: Arc<ConnectionRecord>, recover_first: bool) {
    let connection = record.connection();
    let mut health = connection.health().subscribe();

    if recover_first {
        if recover(&record).await != ConnectionState::Ready {
            return;
        }
        health.borrow_and_update();
    }

    loop {
        tokio::select! {
            _ = record.cancel.cancelled() => return,
            changed = health.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let status = *health.borrow_and_update();
        let metrics = connection.health().metrics();
        let reason = metrics
            .last_error
            .clone()
            .unwrap_or_else(|| "health probe failed".to_string());

        match status {
            HealthStatus::Healthy => {
                record
                    .transition_if(|s| s == ConnectionState::Degraded, ConnectionState::Ready, None)
                    .await;
            }
            HealthStatus::Unhealthy => {
                record
                    .transition_if(
                        |s| s == ConnectionState::Ready,
                        ConnectionState::Degraded,
                        Some(reason),
                    )
                    .await;
            }
            HealthStatus::Unreachable => {
                let failure = ConnectionError::HealthCheckFailed {
                    server: record.name.clone(),
                    consecutive_failures: metrics.consecutive_failures,
                    reason,
                };
                let moved = record
                    .transition_if(
                        |s| s.is_usable(),
                        ConnectionState::Recovering,
                        Some(failure.to_string()),
                    )
                    .await;
                if moved.is_none() {
                    continue;
                }
                *record.last_error.write() = Some(failure);
                if recover(&record).await != ConnectionState::Ready {
                    return;
                }
                health.borrow_and_update();
            }
        }
    }
}

/// Reconnect with backoff until Ready, Failed or cancelled
async fn recover(record: &ConnectionRecord) -> ConnectionState {
    let policy = record.config().retry;
    let started = Instant::now();
    let deadline = policy.recovery_timeout().map(|limit| started + limit);
    let connection = record.connection();
    connection.health().stop();

    info!(
        server = %record.name,
        max_attempts = policy.max_attempts,
        "[LifecycleManager] Recovery started"
    );

    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_for_attempt(attempt);
        let wake = match deadline {
            Some(deadline) => (Instant::now() + delay).min(deadline),
            None => Instant::now() + delay,
        };
        debug!(
            server = %record.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "[LifecycleManager] Waiting before reconnect"
        );

        tokio::select! {
            _ = record.cancel.cancelled() => return cancelled(record),
            _ = tokio::time::sleep_until(wake) => {}
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            let error = ConnectionError::RecoveryTimeout {
                server: record.name.clone(),
                elapsed: started.elapsed(),
            };
            return give_up(record, error).await;
        }

        let attempt_started = Instant::now();
        let reconnect = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, connection.reconnect())
                    .await
                    .unwrap_or_else(|_| {
                        Err(ConnectionError::RecoveryTimeout {
                            server: record.name.clone(),
                            elapsed: started.elapsed(),
                        })
                    }),
                None => connection.reconnect().await,
            }
        };
        let result = tokio::select! {
            _ = record.cancel.cancelled() => return cancelled(record),
            result = reconnect => result,
        };
        record.record_attempt(attempt_started.elapsed(), &result);

        match result {
            Ok(()) => {
                connection.breaker().reset();
                let moved = record
                    .transition_if(
                        |s| s == ConnectionState::Recovering,
                        ConnectionState::Ready,
                        None,
                    )
                    .await;
                if moved.is_some() {
                    info!(
                        server = %record.name,
                        attempts = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "[LifecycleManager] Recovered"
                    );
                }
                return record.state();
            }
            Err(e) if !should_attempt_recovery(&e) => {
                return give_up(record, e).await;
            }
            Err(e) => {
                warn!(
                    server = %record.name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "[LifecycleManager] Reconnect failed"
                );
            }
        }
    }

    let last_error = record
        .last_error()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts made".to_string());
    let error = ConnectionError::RetryExhausted {
        server: record.name.clone(),
        attempts: policy.max_attempts,
        last_error,
    };
    give_up(record, error).await
}

fn cancelled(record: &ConnectionRecord) -> ConnectionState {
    let error = ConnectionError::RecoveryCancelled {
        server: record.name.clone(),
    };
    info!(server = %record.name, "[LifecycleManager] {}", error);
    record.state()
}

async fn give_up(record: &ConnectionRecord, error: ConnectionError) -> ConnectionState {
    error!(server = %record.name, error = %error, "[LifecycleManager] Recovery failed");
    *record.last_error.write() = Some(error.clone());
    record
        .transition_if(
            |s| s == ConnectionState::Recovering,
            ConnectionState::Failed,
            Some(error.to_string()),
        )
        .await;
    record.connection().suspend().await;
    record.state()
}

// ============================================================================
// ConnectionLifecycleManager
// ============================================================================

pub struct ConnectionLifecycleManager {
    connector: Arc<dyn SessionConnector>,
    records: DashMap<String, Arc<ConnectionRecord>>,
    /// Registration order
    order: RwLock<Vec<String>>,
    /// Serializes the size check with the insert
    admission: Mutex<()>,
    events: EventBus,
}

impl ConnectionLifecycleManager {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self::with_event_bus(connector, EventBus::new())
    }

    pub fn with_event_bus(connector: Arc<dyn SessionConnector>, events: EventBus) -> Self {
        Self {
            connector,
            records: DashMap::new(),
            order: RwLock::new(Vec::new()),
            admission: Mutex::new(()),
            events,
        }
    }

    /// Register `name` and run its first connect
    ///
    /// Connection failures are reflected in the returned state (and
    /// `last_error`), not in the `Err` branch.
    pub async fn start_connection(
        &self,
        name: impl Into<String>,
        config: ServerConfig,
    ) -> Result<ConnectionState> {
        let record = self.register(name.into(), config, None)?;
        Ok(self.connect_record(&record).await)
    }

    /// Validate `config` and insert a Connecting record
    ///
    /// The size check and the insert happen under the admission lock, so
    /// concurrent registrations never push the count past `limit`.
    fn register(
        &self,
        name: String,
        config: ServerConfig,
        limit: Option<usize>,
    ) -> Result<Arc<ConnectionRecord>> {
        config.validate_as(&name)?;
        let connection = ServerConnection::new(name.clone(), config, self.connector.clone());
        let record = Arc::new(ConnectionRecord::new(
            name.clone(),
            connection,
            self.events.sender(),
        ));

        {
            let _admission = self.admission.lock();
            if let Some(max) = limit {
                if self.records.len() >= max && !self.records.contains_key(&name) {
                    return Err(Error::PoolExhausted { max });
                }
            }
            match self.records.entry(name.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(Error::DuplicateServer(name));
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    entry.insert(record.clone());
                }
            }
            self.order.write().push(name.clone());
        }
        info!(server = %name, "[LifecycleManager] Server registered");
        Ok(record)
    }

    async fn connect_record(&self, record: &Arc<ConnectionRecord>) -> ConnectionState {
        let connection = record.connection();
        let started = Instant::now();
        let result = connection.connect().await;
        record.record_attempt(started.elapsed(), &result);

        match result {
            Ok(()) => {
                let moved = record
                    .transition_if(
                        |s| s == ConnectionState::Connecting,
                        ConnectionState::Ready,
                        None,
                    )
                    .await;
                if moved.is_some() {
                    spawn_supervisor(record, false);
                }
            }
            Err(e) => {
                let config = record.config();
                let recover = !config.is_strict()
                    && config.retry.max_attempts > 0
                    && should_attempt_recovery(&e);
                let target = if recover {
                    ConnectionState::Recovering
                } else {
                    ConnectionState::Failed
                };
                warn!(
                    server = %record.name,
                    error = %e,
                    error_kind = e.kind(),
                    next = %target,
                    "[LifecycleManager] Connect failed"
                );

                let moved = record
                    .transition_if(|s| s == ConnectionState::Connecting, target, Some(e.to_string()))
                    .await;
                if moved.is_some() && recover {
                    spawn_supervisor(record, true);
                }
            }
        }
        record.state()
    }

    /// Register a new server, or restart a failed one with `config`
    pub async fn add_server(
        &self,
        name: impl Into<String>,
        config: ServerConfig,
    ) -> Result<ConnectionState> {
        self.admit(name.into(), config, None).await
    }

    /// Like [`add_server`](Self::add_server), but a new name is refused
    /// once `max_pool_size` servers are registered
    pub async fn add_server_within(
        &self,
        name: impl Into<String>,
        config: ServerConfig,
        max_pool_size: usize,
    ) -> Result<ConnectionState> {
        self.admit(name.into(), config, Some(max_pool_size)).await
    }

    async fn admit(
        &self,
        name: String,
        config: ServerConfig,
        limit: Option<usize>,
    ) -> Result<ConnectionState> {
        match self.get(&name) {
            Some(record) => match self.restart_record(&record, Some(config)).await {
                // Registered and not Failed
                Err(Error::InvalidTransition { .. }) => Err(Error::DuplicateServer(name)),
                outcome => outcome,
            },
            None => {
                let record = self.register(name, config, limit)?;
                Ok(self.connect_record(&record).await)
            }
        }
    }

    /// Take a failed server back to Connecting and connect again
    pub async fn restart(&self, name: &str) -> Result<ConnectionState> {
        let record = self
            .get(name)
            .ok_or_else(|| Error::UnknownServer(name.to_string()))?;
        self.restart_record(&record, None).await
    }

    async fn restart_record(
        &self,
        record: &Arc<ConnectionRecord>,
        config: Option<ServerConfig>,
    ) -> Result<ConnectionState> {
        if let Some(config) = &config {
            config.validate_as(&record.name)?;
        }
        // Only the caller that wins this edge replaces the connection
        record.transition(ConnectionState::Connecting, None).await?;
        info!(server = %record.name, "[LifecycleManager] Restarting");

        record.stop_supervisor();
        let previous = record.connection();
        previous.suspend().await;

        let config = config.unwrap_or_else(|| record.config());
        let fresh = ServerConnection::new(record.name.clone(), config.clone(), self.connector.clone());
        *record.config.write() = config;
        *record.connection.write() = Arc::new(fresh);

        Ok(self.connect_record(record).await)
    }

    /// Start every server concurrently
    ///
    /// Strict servers that do not reach Ready fail the whole call with
    /// `StartupFailed`; lenient ones are reported and left to recovery.
    pub async fn initialize(&self, configs: &ServerConfigs) -> Result<InitializeReport> {
        self.initialize_with_limit(configs, None).await
    }

    /// [`initialize`](Self::initialize) that stops registering new servers
    /// at `max_pool_size`
    pub async fn initialize_within(
        &self,
        configs: &ServerConfigs,
        max_pool_size: usize,
    ) -> Result<InitializeReport> {
        self.initialize_with_limit(configs, Some(max_pool_size)).await
    }

    async fn initialize_with_limit(
        &self,
        configs: &ServerConfigs,
        limit: Option<usize>,
    ) -> Result<InitializeReport> {
        info!(servers = configs.len(), "[LifecycleManager] Initializing");

        let starts = configs.iter().map(|(name, config)| async move {
            let outcome = match self.register(name.clone(), config.clone(), limit) {
                Ok(record) => Ok(self.connect_record(&record).await),
                Err(e) => Err(e),
            };
            (name, config.is_strict(), outcome)
        });
        let outcomes = join_all(starts).await;

        let mut report = InitializeReport::default();
        let mut strict_failures = Vec::new();
        for (name, strict, outcome) in outcomes {
            let failure = match outcome {
                Ok(ConnectionState::Ready) => {
                    report.ready.push(name.clone());
                    continue;
                }
                Ok(ConnectionState::Recovering) if !strict => {
                    let reason = self.describe_last_error(name, ConnectionState::Recovering);
                    warn!(server = %name, error = %reason, "[LifecycleManager] Server recovering after startup failure");
                    report.recovering.push(name.clone());
                    continue;
                }
                Ok(state) => ServerFailure::new(name.clone(), self.describe_last_error(name, state)),
                Err(e) => ServerFailure::new(name.clone(), e),
            };

            if strict {
                error!(server = %name, error = %failure.error, "[LifecycleManager] Required server unavailable");
                strict_failures.push(failure.clone());
            } else {
                warn!(server = %name, error = %failure.error, "[LifecycleManager] Optional server unavailable");
            }
            report.failed.push(failure);
        }

        if !strict_failures.is_empty() {
            return Err(Error::StartupFailed {
                failures: strict_failures,
            });
        }

        info!(
            ready = report.ready.len(),
            recovering = report.recovering.len(),
            failed = report.failed.len(),
            "[LifecycleManager] Initialization complete"
        );
        Ok(report)
    }

    fn describe_last_error(&self, name: &str, state: ConnectionState) -> String {
        self.get(name)
            .and_then(|record| record.last_error())
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("connection ended in state {}", state))
    }

    // ========================================================================
    // Removal / shutdown
    // ========================================================================

    /// First phase of removal: cancel background work, stop accepting requests
    pub async fn begin_shutdown(&self, name: &str) -> Result<Arc<ConnectionRecord>> {
        let record = self
            .get(name)
            .ok_or_else(|| Error::UnknownServer(name.to_string()))?;

        record.cancel.cancel();
        record.stop_supervisor();
        record
            .transition_if(
                |s| !s.is_shutting_down(),
                ConnectionState::ShuttingDown,
                None,
            )
            .await;
        record.connection().request_shutdown();
        Ok(record)
    }

    /// Second phase: drain, close the transport, drop the record
    pub async fn finish_shutdown(&self, record: &Arc<ConnectionRecord>, timeout: Duration) {
        record.connection().wait_for_shutdown(timeout).await;
        record
            .transition_if(
                |s| s == ConnectionState::ShuttingDown,
                ConnectionState::Closed,
                None,
            )
            .await;

        let removed = self
            .records
            .remove_if(&record.name, |_, current| Arc::ptr_eq(current, record))
            .is_some();
        if removed {
            self.order.write().retain(|name| name != &record.name);
            info!(server = %record.name, "[LifecycleManager] Server removed");
        }
    }

    pub async fn remove_server(&self, name: &str, timeout: Duration) -> Result<()> {
        let record = self.begin_shutdown(name).await?;
        self.finish_shutdown(&record, timeout).await;
        Ok(())
    }

    /// Close every connection concurrently
    pub async fn shutdown_all(&self, timeout: Duration) {
        let names = self.server_names();
        if names.is_empty() {
            return;
        }
        info!(servers = names.len(), "[LifecycleManager] Shutting down all connections");

        let mut records = Vec::with_capacity(names.len());
        for name in &names {
            if let Ok(record) = self.begin_shutdown(name).await {
                records.push(record);
            }
        }
        join_all(
            records
                .iter()
                .map(|record| self.finish_shutdown(record, timeout)),
        )
        .await;
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn get(&self, name: &str) -> Option<Arc<ConnectionRecord>> {
        self.records.get(name).map(|entry| entry.value().clone())
    }

    pub fn state_of(&self, name: &str) -> Option<ConnectionState> {
        self.records.get(name).map(|entry| entry.state())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Registered server names in registration order
    pub fn server_names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Every record in registration order
    pub fn records(&self) -> Vec<Arc<ConnectionRecord>> {
        self.order
            .read()
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    /// Ready records in registration order
    pub fn ready_connections(&self) -> Vec<Arc<ConnectionRecord>> {
        self.records_in(|state| state == ConnectionState::Ready)
    }

    /// Ready or Degraded records in registration order
    pub fn usable_connections(&self) -> Vec<Arc<ConnectionRecord>> {
        self.records_in(|state| state.is_usable())
    }

    fn records_in(&self, filter: impl Fn(ConnectionState) -> bool) -> Vec<Arc<ConnectionRecord>> {
        self.records()
            .into_iter()
            .filter(|record| filter(record.state()))
            .collect()
    }

    /// Failed or recovering servers with their last error
    pub fn failed_connections(&self) -> Vec<FailedConnection> {
        self.records_in(|state| state.is_failing())
            .into_iter()
            .map(|record| FailedConnection {
                server_name: record.name.clone(),
                state: record.state(),
                last_error: record.last_error().map(|e| e.to_string()),
                attempts: record.attempts.lock().len(),
            })
            .collect()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> EventSender {
        self.events.sender()
    }
}
