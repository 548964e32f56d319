//! Error taxonomy
//!
//! [`ConnectionError`] is the closed set of per-connection failures that the
//! lifecycle manager bases its retry decisions on. Each variant carries the
//! originating server and enough structure (attempts, retry-after, transport
//! failure) that no caller has to parse message strings.
//!
//! [`Error`] is what the public API returns: connection failures plus pool
//! and aggregation errors.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{CapabilityKind, ConnectionState, TransportKind};

/// Transport-specific failure detail
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    #[error("process exited{}", .code.map(|c| format!(" with status {}", c)).unwrap_or_default())]
    ProcessExited { code: Option<i32> },

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("{0}")]
    Io(String),
}

impl TransportFailure {
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Client errors other than timeout/rate-limit will not fix themselves
            Self::HttpStatus { status } => *status >= 500 || *status == 408 || *status == 429,
            _ => true,
        }
    }
}

/// Per-connection failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionError {
    #[error("[{server}] connection timed out after {timeout:?}")]
    ConnectionTimeout { server: String, timeout: Duration },

    #[error("[{server}] connection lost: {reason}")]
    ConnectionLost { server: String, reason: String },

    #[error("[{server}] {transport} transport error: {failure}")]
    Transport {
        server: String,
        transport: TransportKind,
        failure: TransportFailure,
    },

    #[error("[{server}] configuration error: {reason}")]
    Configuration { server: String, reason: String },

    #[error("[{server}] circuit open after {consecutive_failures} failures, retry in {retry_after:?}")]
    CircuitOpen {
        server: String,
        retry_after: Duration,
        consecutive_failures: u32,
    },

    #[error("[{server}] gave up after {attempts} recovery attempts: {last_error}")]
    RetryExhausted {
        server: String,
        attempts: u32,
        last_error: String,
    },

    #[error("[{server}] health check failed {consecutive_failures} times: {reason}")]
    HealthCheckFailed {
        server: String,
        consecutive_failures: u32,
        reason: String,
    },

    #[error("[{server}] recovery did not finish within {elapsed:?}")]
    RecoveryTimeout { server: String, elapsed: Duration },

    #[error("[{server}] recovery cancelled")]
    RecoveryCancelled { server: String },

    #[error("[{server}] {operation} timed out after {timeout:?}")]
    RequestTimeout {
        server: String,
        operation: String,
        timeout: Duration,
    },

    /// The server answered, but with an error
    #[error("[{server}] server error: {message}")]
    Remote { server: String, message: String },

    #[error("[{server}] connection is shutting down")]
    ShuttingDown { server: String },
}

impl ConnectionError {
    pub fn server_name(&self) -> &str {
        match self {
            Self::ConnectionTimeout { server, .. }
            | Self::ConnectionLost { server, .. }
            | Self::Transport { server, .. }
            | Self::Configuration { server, .. }
            | Self::CircuitOpen { server, .. }
            | Self::RetryExhausted { server, .. }
            | Self::HealthCheckFailed { server, .. }
            | Self::RecoveryTimeout { server, .. }
            | Self::RecoveryCancelled { server }
            | Self::RequestTimeout { server, .. }
            | Self::Remote { server, .. }
            | Self::ShuttingDown { server } => server,
        }
    }

    /// Whether reconnecting could plausibly fix this
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectionTimeout { .. }
            | Self::ConnectionLost { .. }
            | Self::CircuitOpen { .. }
            | Self::HealthCheckFailed { .. }
            | Self::RequestTimeout { .. } => true,
            Self::Transport { failure, .. } => failure.is_recoverable(),
            Self::Configuration { .. }
            | Self::RetryExhausted { .. }
            | Self::RecoveryTimeout { .. }
            | Self::RecoveryCancelled { .. }
            | Self::Remote { .. }
            | Self::ShuttingDown { .. } => false,
        }
    }

    /// Earliest time a retry makes sense, when the error knows it
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Stable identifier for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionTimeout { .. } => "connection_timeout",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::Transport { .. } => "transport_error",
            Self::Configuration { .. } => "configuration_error",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::HealthCheckFailed { .. } => "health_check_failed",
            Self::RecoveryTimeout { .. } => "recovery_timeout",
            Self::RecoveryCancelled { .. } => "recovery_cancelled",
            Self::RequestTimeout { .. } => "request_timeout",
            Self::Remote { .. } => "remote_error",
            Self::ShuttingDown { .. } => "shutting_down",
        }
    }

    /// Lift a session-level error into the taxonomy
    pub fn from_session(server: &str, transport: TransportKind, error: SessionError) -> Self {
        let server = server.to_string();
        match error {
            SessionError::Closed => Self::ConnectionLost {
                server,
                reason: "session closed".to_string(),
            },
            SessionError::Transport(message) => Self::Transport {
                server,
                transport,
                failure: TransportFailure::Io(message),
            },
            SessionError::Remote(message) => Self::Remote { server, message },
        }
    }
}

/// Error reported by a live session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The peer went away
    #[error("session closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    /// The peer replied with a protocol-level error
    #[error("remote error: {0}")]
    Remote(String),
}

/// One server that failed during a fan-out operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerFailure {
    pub server: String,
    pub error: String,
}

impl ServerFailure {
    pub fn new(server: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            server: server.into(),
            error: error.to_string(),
        }
    }
}

fn describe_failures(failures: &[ServerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.server, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by the public API
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("unknown server '{0}'")]
    UnknownServer(String),

    #[error("server '{0}' is already registered")]
    DuplicateServer(String),

    #[error("server '{server}' is not ready (state: {state})")]
    NotReady {
        server: String,
        state: ConnectionState,
    },

    #[error("server '{server}' is not healthy")]
    Unhealthy { server: String },

    #[error("connection pool is full ({max} connections)")]
    PoolExhausted { max: usize },

    #[error("startup failed, required servers unavailable: {}", describe_failures(.failures))]
    StartupFailed { failures: Vec<ServerFailure> },

    #[error("all {} servers failed to report capabilities: {}", .failures.len(), describe_failures(.failures))]
    AllServersFailed { failures: Vec<ServerFailure> },

    #[error("no provider for {kind} '{name}'")]
    NoProvider { kind: CapabilityKind, name: String },

    #[error("invalid state transition for '{server}': {from} -> {to}")]
    InvalidTransition {
        server: String,
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Originating server, when there is exactly one
    pub fn server_name(&self) -> Option<&str> {
        match self {
            Self::Connection(e) => Some(e.server_name()),
            Self::UnknownServer(server) | Self::DuplicateServer(server) => Some(server),
            Self::NotReady { server, .. }
            | Self::Unhealthy { server }
            | Self::InvalidTransition { server, .. } => Some(server),
            Self::PoolExhausted { .. }
            | Self::StartupFailed { .. }
            | Self::AllServersFailed { .. }
            | Self::NoProvider { .. }
            | Self::Config(_) => None,
        }
    }

    /// Whether the agent loop may retry the same call later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_recoverable(),
            Self::NotReady { .. } | Self::Unhealthy { .. } | Self::AllServersFailed { .. } => true,
            _ => false,
        }
    }

    /// The underlying connection error, if any
    pub fn as_connection(&self) -> Option<&ConnectionError> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
