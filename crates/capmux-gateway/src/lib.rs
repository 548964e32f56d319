//! # Capmux Gateway
//!
//! Keeps a fleet of MCP server connections alive and presents their tools,
//! prompts and resources as one catalog:
//! - Per-server circuit breaker and health monitoring
//! - Connection state machine with automatic recovery
//! - Strict / lenient startup policy
//! - Aggregated capability catalog with stable, collision-free names
//! - Lifecycle events for everything that happens to a connection

pub mod gateway;
pub mod logging;
pub mod pool;

pub use gateway::McpGateway;
pub use logging::{init_tracing, LoggingConfig};
pub use pool::{
    // Resilience
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState, HealthMetrics, HealthMonitor,
    HealthStatus,
    // Connections
    ConnectAttempt, ConnectionLifecycleManager, ConnectionRecord, FailedConnection,
    InitializeReport, RequestMetrics, RequestScope, ServerConnection,
    // Pool
    ClientOptions, ConnectionPoolManager, PoolStatistics, PooledClient, WarmupReport,
    // Catalog
    AggregatedCatalog, CatalogCounts, KindCatalog, NameRegistry, ToolAggregator,
};
