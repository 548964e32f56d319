//! Connection pool - supervised MCP connections and the capability catalog
//!
//! - **CircuitBreaker**: per-server call gate
//! - **HealthMonitor**: periodic liveness probing
//! - **ServerConnection**: one session with its breaker and monitor
//! - **ConnectionLifecycleManager**: state machine, supervision, recovery
//! - **ConnectionPoolManager**: pool limits, clients, warmup, statistics
//! - **ToolAggregator**: merged catalog and dispatch

mod aggregator;
mod circuit_breaker;
mod connection;
mod health;
mod lifecycle;
mod pool_manager;

pub use aggregator::{AggregatedCatalog, CatalogCounts, KindCatalog, NameRegistry, ToolAggregator};
pub use circuit_breaker::{BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use connection::{RequestMetrics, RequestScope, ServerConnection};
pub use health::{HealthMetrics, HealthMonitor, HealthStatus};
pub use lifecycle::{
    ConnectAttempt, ConnectionLifecycleManager, ConnectionRecord, FailedConnection,
    InitializeReport,
};
pub use pool_manager::{
    ClientOptions, ConnectionPoolManager, PoolStatistics, PooledClient, WarmupReport,
};
