//! Lifecycle events
//!
//! Every connection state transition produces exactly one event. Consumers
//! (the aggregator's cache, telemetry, UIs) match on the variant instead of
//! probing payload fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ConnectionState;

/// Payload shared by every lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub server_name: String,
    pub previous_state: ConnectionState,
    pub new_state: ConnectionState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateTransition {
    pub fn new(
        server_name: impl Into<String>,
        previous_state: ConnectionState,
        new_state: ConnectionState,
        error: Option<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            previous_state,
            new_state,
            timestamp: Utc::now(),
            error,
        }
    }

    /// Whether the transition entered or left `Ready`
    pub fn touches_ready(&self) -> bool {
        (self.previous_state == ConnectionState::Ready) != (self.new_state == ConnectionState::Ready)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// First successful connect
    ConnectionReady(StateTransition),
    /// Degraded, recovering or failed
    ConnectionFailed(StateTransition),
    /// Back to Ready after degradation or recovery
    ConnectionRecovered(StateTransition),
    /// Shutting down or closed
    ConnectionShutdown(StateTransition),
}

impl LifecycleEvent {
    /// Classify a transition into its event
    pub fn from_transition(transition: StateTransition) -> Self {
        use ConnectionState::*;
        match (transition.previous_state, transition.new_state) {
            (Connecting, Ready) => Self::ConnectionReady(transition),
            (_, Ready) => Self::ConnectionRecovered(transition),
            (_, ShuttingDown | Closed) => Self::ConnectionShutdown(transition),
            _ => Self::ConnectionFailed(transition),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ConnectionReady(_) => "connection_ready",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::ConnectionRecovered(_) => "connection_recovered",
            Self::ConnectionShutdown(_) => "connection_shutdown",
        }
    }

    pub fn transition(&self) -> &StateTransition {
        match self {
            Self::ConnectionReady(t)
            | Self::ConnectionFailed(t)
            | Self::ConnectionRecovered(t)
            | Self::ConnectionShutdown(t) => t,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.transition().server_name
    }

    pub fn new_state(&self) -> ConnectionState {
        self.transition().new_state
    }
}
