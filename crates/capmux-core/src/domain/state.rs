//! Connection state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one server connection
///
/// The only cycle is `Ready ⇄ Degraded ⇄ Recovering`. Everything else moves
/// forward, except that an explicit restart may take a `Failed` connection
/// back to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Session is being established
    Connecting,
    /// Session established and healthy
    Ready,
    /// Session established but health probes are failing
    Degraded,
    /// Session lost, recovery loop running
    Recovering,
    /// Terminal until an explicit restart
    Failed,
    /// Draining in-flight requests before teardown
    ShuttingDown,
    /// Transport torn down, record about to be dropped
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Recovering => "recovering",
            Self::Failed => "failed",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        }
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Ready | Recovering | Failed | ShuttingDown)
                | (Ready, Degraded | Recovering | ShuttingDown)
                | (Degraded, Ready | Recovering | ShuttingDown)
                | (Recovering, Ready | Failed | ShuttingDown)
                | (Failed, Connecting | ShuttingDown)
                | (ShuttingDown, Closed)
        )
    }

    /// Whether requests may be routed to a connection in this state
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Failed, or on its way back from a failure
    pub fn is_failing(&self) -> bool {
        matches!(self, Self::Failed | Self::Recovering)
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
