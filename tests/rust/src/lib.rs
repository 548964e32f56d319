//! Shared test utilities and fixtures for capmux integration tests.

pub use capmux_core::{
    CapabilityKind, ConnectionError, ConnectionState, Error, LifecycleEvent, RemoteCapability,
    ServerConfig, ServerConfigs,
};

use tracing_subscriber::EnvFilter;

/// Route gateway logs into the test output, filtered by `RUST_LOG`
pub fn init_test_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Fake sessions and connectors
pub mod mocks;
pub use mocks::{ConnectScript, FakeConnector, FakeSession};

/// Gateway test harness
pub mod services;
pub use services::GatewayTestHarness;

/// Event testing utilities
pub mod events {
    use capmux_core::{ConnectionState, EventReceiver, LifecycleEvent};
    use std::time::Duration;

    /// Collect events until the stream stays quiet for `timeout`
    pub async fn collect_events(rx: &mut EventReceiver, timeout: Duration) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(timeout, rx.recv()).await {
            events.push(event);
        }
        events
    }

    /// Drain whatever is already buffered
    pub fn drain_events(rx: &mut EventReceiver) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the first event matching `predicate`
    pub async fn wait_for_event<F>(
        rx: &mut EventReceiver,
        timeout: Duration,
        predicate: F,
    ) -> Option<LifecycleEvent>
    where
        F: Fn(&LifecycleEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Wait until `server` enters `state`
    pub async fn wait_for_state(
        rx: &mut EventReceiver,
        server: &str,
        state: ConnectionState,
        timeout: Duration,
    ) -> Option<LifecycleEvent> {
        wait_for_event(rx, timeout, |e| e.server_name() == server && e.new_state() == state).await
    }

    /// `(type, server, new state)` triples for compact assertions
    pub fn summarize(events: &[LifecycleEvent]) -> Vec<(&'static str, String, ConnectionState)> {
        events
            .iter()
            .map(|e| (e.type_name(), e.server_name().to_string(), e.new_state()))
            .collect()
    }
}

/// Server config fixtures
pub mod fixtures {
    use capmux_core::{CircuitBreakerConfig, HealthCheckConfig, RetryPolicy, ServerConfig};
    use std::time::Duration;

    /// Retry policy with short, deterministic delays
    pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 50,
            max_delay_ms: 400,
            multiplier: 2.0,
            jitter: 0.0,
            recovery_timeout_ms: None,
        }
    }

    /// Probe every `interval_ms`, degrade after one miss, recover after three
    pub fn fast_health(interval_ms: u64) -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            interval_ms,
            timeout_ms: interval_ms / 2,
            unhealthy_threshold: 1,
            recovery_threshold: 3,
        }
    }

    pub fn no_health() -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn breaker(failure_threshold: u32, recovery_timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 1,
            recovery_timeout_ms,
            time_window_ms: 60_000,
        }
    }

    /// Lenient stdio server with fast retries and no background probing
    pub fn lenient(name: &str) -> ServerConfig {
        ServerConfig::stdio(name, vec![])
            .with_retry(fast_retry(3))
            .with_health_check(no_health())
            .with_connect_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(2))
    }

    pub fn strict(name: &str) -> ServerConfig {
        lenient(name).strict()
    }
}

/// Common timeouts for tests
pub mod timeouts {
    use std::time::Duration;

    pub const SHORT: Duration = Duration::from_millis(100);
    pub const DEFAULT: Duration = Duration::from_secs(5);
    pub const LONG: Duration = Duration::from_secs(30);
}
