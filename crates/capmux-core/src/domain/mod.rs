//! Domain types

pub mod capability;
pub mod config;
pub mod event;
pub mod state;

pub use capability::{
    CapabilityDescriptor, CapabilityKind, CapabilityListing, RemoteCapability, ToolCallOutput,
};
pub use config::{
    CircuitBreakerConfig, ConnectionMode, GatewayConfig, HealthCheckConfig, PoolConfig,
    RetryPolicy, ServerConfig, ServerConfigs, TransportConfig, TransportKind,
};
pub use event::{LifecycleEvent, StateTransition};
pub use state::ConnectionState;
