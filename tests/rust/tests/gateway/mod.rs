//! Gateway integration tests
//!
//! Connection lifecycle, resilience, pool management and the aggregated
//! catalog, all driven through fake sessions.

mod aggregator;
mod pool_manager;
