//! Periodic liveness probing for one session
//!
//! Probe results never touch the circuit breaker. They only feed the health
//! status, which the lifecycle manager watches to decide between Ready,
//! Degraded and Recovering.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use capmux_core::{HealthCheckConfig, McpSession, SessionError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Probes kept for the rolling latency average
const LATENCY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Probes failing, session presumably still there
    Unhealthy,
    /// Session gone or failing long enough to warrant reconnecting
    Unreachable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_probes: u64,
    pub failed_probes: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_latency: Option<Duration>,
}

#[derive(Default)]
struct ProbeState {
    metrics: HealthMetrics,
    latencies: VecDeque<Duration>,
}

struct HealthShared {
    server_name: String,
    config: HealthCheckConfig,
    state: Mutex<ProbeState>,
    status: watch::Sender<HealthStatus>,
}

impl HealthShared {
    async fn probe(&self, session: &dyn McpSession) -> HealthStatus {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.timeout(), session.ping()).await;
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(())) => self.record_success(latency),
            Ok(Err(SessionError::Closed)) => self.record_failure("session closed".into(), true),
            Ok(Err(e)) => self.record_failure(e.to_string(), false),
            Err(_) => self.record_failure(
                format!("probe timed out after {:?}", self.config.timeout()),
                false,
            ),
        }
    }

    fn record_success(&self, latency: Duration) -> HealthStatus {
        {
            let mut state = self.state.lock();
            state.latencies.push_back(latency);
            if state.latencies.len() > LATENCY_WINDOW {
                state.latencies.pop_front();
            }
            let average =
                state.latencies.iter().sum::<Duration>() / state.latencies.len() as u32;

            let metrics = &mut state.metrics;
            metrics.total_probes += 1;
            metrics.consecutive_failures = 0;
            metrics.consecutive_successes += 1;
            metrics.last_success_at = Some(Utc::now());
            metrics.average_latency = Some(average);
        }
        debug!(
            server = %self.server_name,
            latency_ms = latency.as_millis() as u64,
            "[HealthMonitor] Probe ok"
        );
        self.publish(HealthStatus::Healthy);
        HealthStatus::Healthy
    }

    fn record_failure(&self, error: String, session_closed: bool) -> HealthStatus {
        let status = {
            let mut state = self.state.lock();
            let metrics = &mut state.metrics;
            metrics.total_probes += 1;
            metrics.failed_probes += 1;
            metrics.consecutive_successes = 0;
            metrics.consecutive_failures += 1;
            metrics.last_failure_at = Some(Utc::now());
            metrics.last_error = Some(error.clone());

            if session_closed || metrics.consecutive_failures >= self.config.recovery_threshold {
                HealthStatus::Unreachable
            } else if metrics.consecutive_failures >= self.config.unhealthy_threshold {
                HealthStatus::Unhealthy
            } else {
                *self.status.borrow()
            }
        };
        debug!(server = %self.server_name, error = %error, "[HealthMonitor] Probe failed");
        self.publish(status);
        status
    }

    fn publish(&self, next: HealthStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if !changed {
            return;
        }
        match next {
            HealthStatus::Healthy => info!(server = %self.server_name, "[HealthMonitor] Healthy"),
            HealthStatus::Unhealthy => {
                warn!(server = %self.server_name, "[HealthMonitor] Unhealthy")
            }
            HealthStatus::Unreachable => {
                warn!(server = %self.server_name, "[HealthMonitor] Unreachable")
            }
        }
    }
}

/// Liveness monitor owned by one [`ServerConnection`](super::ServerConnection)
pub struct HealthMonitor {
    shared: Arc<HealthShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(server_name: impl Into<String>, config: HealthCheckConfig) -> Self {
        let (status, _) = watch::channel(HealthStatus::Healthy);
        Self {
            shared: Arc::new(HealthShared {
                server_name: server_name.into(),
                config,
                state: Mutex::new(ProbeState::default()),
                status,
            }),
            task: Mutex::new(None),
        }
    }

    /// Start probing `session` every interval, replacing any previous loop
    pub fn start(&self, session: Arc<dyn McpSession>) {
        self.stop();
        if !self.shared.config.enabled {
            return;
        }

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let period = shared.config.interval();
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.probe(session.as_ref()).await;
            }
        });
        *self.task.lock() = Some(handle);
        debug!(
            server = %self.shared.server_name,
            interval_ms = self.shared.config.interval_ms,
            "[HealthMonitor] Started"
        );
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one probe right away
    pub async fn probe_now(&self, session: &dyn McpSession) -> HealthStatus {
        self.shared.probe(session).await
    }

    /// Forget failure streaks and report healthy, e.g. after a reconnect
    pub fn reset(&self) {
        {
            let mut state = self.shared.state.lock();
            state.metrics.consecutive_failures = 0;
            state.metrics.last_error = None;
        }
        self.shared.publish(HealthStatus::Healthy);
    }

    pub fn status(&self) -> HealthStatus {
        *self.shared.status.borrow()
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    pub fn metrics(&self) -> HealthMetrics {
        self.shared.state.lock().metrics.clone()
    }

    /// Receive a notification on every status change
    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.shared.status.subscribe()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
