//! End-to-end scenarios: configuration in, aggregated catalog out

mod config;
