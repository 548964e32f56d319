//! Per-server circuit breaker
//!
//! A pure state machine driven by the calls that pass through it; it owns no
//! timers. Time comes from `tokio::time::Instant`, so tests can pause and
//! advance the clock.
//!
//! ```text
//!   Closed ──(failures in window ≥ threshold)──► Open
//!     ▲                                           │ next_retry_at elapsed
//!     │ success_threshold probes ok               ▼
//!     └────────────────────────────────────── HalfOpen ──(probe fails)──► Open
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use capmux_core::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Traffic flows
    Closed,
    /// Traffic blocked until `next_retry_at`
    Open,
    /// One probe at a time
    HalfOpen,
}

/// Outcome of a call rejected by, or failing through, the breaker
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit open, retry in {retry_after:?}")]
    Open {
        retry_after: Duration,
        consecutive_failures: u32,
    },
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view for statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub failures_in_window: usize,
    pub retry_after: Option<Duration>,
    pub times_opened: u64,
    pub rejected_calls: u64,
}

struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    next_retry_at: Option<Instant>,
    probe_in_flight: bool,
    times_opened: u64,
    rejected_calls: u64,
}

pub struct CircuitBreaker {
    server_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Admission ticket for one call
///
/// A probe ticket dropped without an outcome (the caller's future was
/// cancelled) gives the probe slot back.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Permit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.inner.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(server_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            server_name: server_name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                consecutive_failures: 0,
                consecutive_successes: 0,
                next_retry_at: None,
                probe_in_flight: false,
                times_opened: 0,
                rejected_calls: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn next_retry_time(&self) -> Option<Instant> {
        self.inner.lock().next_retry_at
    }

    /// Whether a call made now would be admitted
    pub fn is_call_permitted(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .next_retry_at
                .map_or(true, |at| Instant::now() >= at),
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Run `operation` if the breaker admits it
    ///
    /// Rejected calls never invoke `operation`.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire().map_err(|(retry_after, consecutive_failures)| {
            BreakerError::Open {
                retry_after,
                consecutive_failures,
            }
        })?;

        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(error) => {
                permit.fail();
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// Open the circuit regardless of counters
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.trip(&mut inner, Instant::now());
        info!(server = %self.server_name, "[CircuitBreaker] Forced open");
    }

    /// Close the circuit and clear all counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.next_retry_at = None;
        inner.probe_in_flight = false;
        debug!(server = %self.server_name, "[CircuitBreaker] Reset");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.prune(&mut inner, now);
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            failures_in_window: inner.failures.len(),
            retry_after: match inner.state {
                CircuitState::Open => inner
                    .next_retry_at
                    .map(|at| at.saturating_duration_since(now)),
                _ => None,
            },
            times_opened: inner.times_opened,
            rejected_calls: inner.rejected_calls,
        }
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    fn acquire(&self) -> Result<Permit<'_>, (Duration, u32)> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let retry_at = inner.next_retry_at.unwrap_or(now);
                if now < retry_at {
                    inner.rejected_calls += 1;
                    return Err((retry_at - now, inner.consecutive_failures));
                }
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.probe_in_flight = true;
                info!(server = %self.server_name, "[CircuitBreaker] Half-open, admitting probe");
                true
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejected_calls += 1;
                    return Err((Duration::ZERO, inner.consecutive_failures));
                }
                inner.probe_in_flight = true;
                true
            }
        };
        Ok(Permit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.next_retry_at = None;
                    info!(server = %self.server_name, "[CircuitBreaker] Closed after successful probe");
                }
            }
            CircuitState::Closed => {
                inner.failures.clear();
                inner.consecutive_failures = 0;
            }
            // A call admitted before the circuit opened; the open state stands
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                self.trip(&mut inner, now);
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                self.prune(&mut inner, now);
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    self.trip(&mut inner, now);
                }
            }
            _ => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        let retry_at = now + self.config.recovery_timeout();
        inner.state = CircuitState::Open;
        inner.next_retry_at = Some(retry_at);
        inner.consecutive_successes = 0;
        inner.times_opened += 1;
        warn!(
            server = %self.server_name,
            consecutive_failures = inner.consecutive_failures,
            retry_in_ms = self.config.recovery_timeout_ms,
            "[CircuitBreaker] Opened"
        );
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        let window = self.config.time_window();
        while let Some(oldest) = inner.failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }
}
