//! # Capmux Core Library
//!
//! Domain types and shared building blocks for capmux.
//!
//! ## Modules
//!
//! - `domain` - Configuration, connection states, capabilities, lifecycle events
//! - `error` - Connection error taxonomy and the public `Error` type
//! - `backoff` - Recovery predicate and retry delay calculation
//! - `event_bus` - Lifecycle event distribution
//! - `session` - Session and connector traits implemented by transports

pub mod backoff;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod session;

pub use domain::*;

pub use backoff::{
    backoff_ceiling, calculate_retry_delay, calculate_retry_delay_with_jitter,
    should_attempt_recovery,
};
pub use error::{ConnectionError, Error, Result, ServerFailure, SessionError, TransportFailure};
pub use event_bus::{EventBus, EventReceiver, EventSender, SharedEventBus};
pub use session::{JsonObject, McpSession, SessionConnector, SessionResult};
