//! Event Bus - lifecycle event distribution
//!
//! The lifecycle manager is the only producer. Consumers are the aggregator
//! (catalog invalidation) and anything outside the crate that wants to watch
//! connections come and go.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Event Bus (broadcast channel)                │
//! │                                                              │
//! │  Producer:                      Consumers:                   │
//! │  └─ ConnectionLifecycleManager  ├─ ToolAggregator (cache)    │
//! │                                 ├─ McpGateway::subscribe()   │
//! │                                 └─ telemetry, UI bridges...  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::LifecycleEvent;

/// Default channel capacity for the event bus
const DEFAULT_CAPACITY: usize = 256;

/// Central hub for lifecycle events
///
/// Every subscriber receives its own copy of each event emitted after it
/// subscribed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get a cloneable sender for emitting events
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Sender half handed to producers
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventSender {
    /// Emit an event
    ///
    /// Returns the number of receivers; 0 just means nobody is listening.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        let type_name = event.type_name();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(
                    event_type = type_name,
                    receivers = count,
                    "[EventBus] Emitted event"
                );
                count
            }
            Err(_) => {
                debug!(event_type = type_name, "[EventBus] No receivers for event");
                0
            }
        }
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe())
    }
}

/// Receiver half handed to consumers
pub struct EventReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
    lagged: bool,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<LifecycleEvent>) -> Self {
        Self {
            receiver,
            lagged: false,
        }
    }

    /// Receive the next event
    ///
    /// Returns `None` once the channel is closed. Lag is logged and
    /// remembered (see [`EventReceiver::take_lagged`]), then skipped.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "[EventBus] Receiver lagged, skipped {} events", skipped
                    );
                    self.lagged = true;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("[EventBus] Channel closed");
                    return None;
                }
            }
        }
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "[EventBus] Receiver lagged on try_recv"
                    );
                    self.lagged = true;
                }
                Err(_) => return None,
            }
        }
    }

    /// Whether events were dropped since the last call
    pub fn take_lagged(&mut self) -> bool {
        std::mem::take(&mut self.lagged)
    }

    /// Unwrap into the raw broadcast receiver
    pub fn into_inner(self) -> broadcast::Receiver<LifecycleEvent> {
        self.receiver
    }
}

pub type SharedEventBus = Arc<EventBus>;

// ============================================================================
// TESTS
// ============================================================================
