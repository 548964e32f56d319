//! Pool manager tests: clients, limits, statistics, warmup

use capmux_core::{ConnectionState, Error, PoolConfig, ServerConfigs, SessionError};
use capmux_gateway::ClientOptions;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tests::fixtures::{fast_health, lenient, strict};
use tests::{ConnectScript, FakeSession, GatewayTestHarness};

fn pool_of(max_pool_size: usize) -> PoolConfig {
    PoolConfig {
        max_pool_size,
        ..PoolConfig::default()
    }
}

// ============================================================================
// Clients
// ============================================================================

#[tokio::test]
async fn test_get_client_for_ready_server() {
    let harness = GatewayTestHarness::new();
    harness.add_with_tools("alpha", &["search"]).await;

    let client = harness
        .gateway
        .get_client("alpha", ClientOptions::default())
        .unwrap();
    assert_eq!(client.server_name(), "alpha");
    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.timeout(), Duration::from_secs(2));
    assert!(client.session_id().is_some());

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_get_client_unknown_server() {
    let harness = GatewayTestHarness::new();
    let result = harness.gateway.get_client("ghost", ClientOptions::default());
    assert!(matches!(result, Err(Error::UnknownServer(_))));
}

#[tokio::test]
async fn test_get_client_failed_server_is_not_ready() {
    let harness = GatewayTestHarness::new();
    harness.connector.script("core", ConnectScript::AlwaysFail);
    harness.gateway.add_server("core", strict("core")).await.unwrap();

    let result = harness.gateway.get_client("core", ClientOptions::default());
    assert!(matches!(
        result,
        Err(Error::NotReady { state: ConnectionState::Failed, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_degraded_server_needs_lenient_client_options() {
    let mut harness = GatewayTestHarness::new();
    let config = lenient("alpha").with_health_check(fast_health(100));
    let session = harness
        .add("alpha", FakeSession::new().with_tools(&["search"]), config)
        .await;

    session.fail_pings(Some(SessionError::Transport("ping timed out".into())));
    harness.wait_for_state("alpha", ConnectionState::Degraded).await;

    let strict_client = harness
        .gateway
        .get_client("alpha", ClientOptions::default().healthy_only());
    assert!(matches!(strict_client, Err(Error::Unhealthy { .. })));

    let client = harness
        .gateway
        .get_client("alpha", ClientOptions::default())
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Degraded);
    client.call_tool("search", None).await.unwrap();
}

#[tokio::test]
async fn test_get_clients_in_registration_order() {
    let harness = GatewayTestHarness::new();
    harness.add_with_tools("zeta", &["z"]).await;
    harness.connector.script("broken", ConnectScript::Misconfigured);
    harness.gateway.add_server("broken", lenient("broken")).await.unwrap();
    harness.add_with_tools("alpha", &["a"]).await;

    let names: Vec<String> = harness
        .gateway
        .get_clients()
        .iter()
        .map(|c| c.server_name().to_string())
        .collect();
    assert_eq!(names, vec!["zeta", "alpha"]);
}

// ============================================================================
// Limits and configuration
// ============================================================================

#[tokio::test]
async fn test_pool_limit_rejects_new_servers() {
    let harness = GatewayTestHarness::with_pool_config(pool_of(2));
    harness.add_with_tools("a", &["a1"]).await;
    harness.connector.script("b", ConnectScript::Misconfigured);
    harness.gateway.add_server("b", lenient("b")).await.unwrap();

    let result = harness.gateway.add_server("c", lenient("c")).await;
    assert!(matches!(result, Err(Error::PoolExhausted { max: 2 })));

    // Restarting a registered server does not need a free slot
    harness.connector.clear_script("b");
    let state = harness.gateway.add_server("b", lenient("b")).await.unwrap();
    assert_eq!(state, ConnectionState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_respect_pool_limit() {
    let harness = GatewayTestHarness::with_pool_config(pool_of(3));

    let adds = (0..4).map(|i| {
        let pool = harness.gateway.pool().clone();
        let name = format!("srv-{i}");
        let config = lenient(&name);
        tokio::spawn(async move { pool.add_server(name, config).await })
    });
    let outcomes: Vec<_> = join_all(adds)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let started = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(ConnectionState::Ready)))
        .count();
    let exhausted = outcomes
        .iter()
        .filter(|o| matches!(o, Err(Error::PoolExhausted { max: 3 })))
        .count();
    assert_eq!((started, exhausted), (3, 1));
    assert_eq!(harness.gateway.get_server_names().len(), 3);
}

#[tokio::test]
async fn test_lenient_overflow_is_reported() {
    let harness = GatewayTestHarness::with_pool_config(pool_of(1));
    let servers = ServerConfigs::new()
        .with("a", lenient("a"))
        .with("b", lenient("b"));

    let report = harness.gateway.initialize_from_config(&servers).await.unwrap();
    assert_eq!(report.ready, vec!["a".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].server, "b");
    assert_eq!(harness.gateway.get_server_names(), vec!["a".to_string()]);
}

#[tokio::test]
async fn test_strict_overflow_fails_startup() {
    let harness = GatewayTestHarness::with_pool_config(pool_of(1));
    let servers = ServerConfigs::new()
        .with("a", lenient("a"))
        .with("b", strict("b"));

    let result = harness.gateway.initialize_from_config(&servers).await;
    match result {
        Err(Error::StartupFailed { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].server, "b");
        }
        other => panic!("expected StartupFailed, got {:?}", other.map(|r| r.total())),
    }
    // Nothing was started
    assert!(harness.gateway.get_server_names().is_empty());
}

#[tokio::test]
async fn test_update_config_validates_and_applies() {
    let harness = GatewayTestHarness::new();
    let result = harness.gateway.pool().update_config(pool_of(0));
    assert!(matches!(result, Err(Error::Config(_))));

    harness.gateway.pool().update_config(pool_of(8)).unwrap();
    assert_eq!(harness.gateway.pool().config().max_pool_size, 8);
    assert_eq!(harness.gateway.get_statistics().max_pool_size, 8);
}

#[tokio::test]
async fn test_shrinking_pool_keeps_live_connections() {
    let harness = GatewayTestHarness::new();
    harness.add_with_tools("a", &["a1"]).await;
    harness.add_with_tools("b", &["b1"]).await;

    harness.gateway.pool().update_config(pool_of(1)).unwrap();
    assert_eq!(harness.gateway.get_server_names().len(), 2);

    let result = harness.gateway.add_server("c", lenient("c")).await;
    assert!(matches!(result, Err(Error::PoolExhausted { max: 1 })));
}

#[tokio::test]
async fn test_invalid_server_config_rejected() {
    let harness = GatewayTestHarness::new();
    let result = harness
        .gateway
        .add_server("web", capmux_core::ServerConfig::http(""))
        .await;
    match result {
        Err(Error::Config(reason)) => {
            assert!(reason.starts_with("server 'web': http transport"), "{reason}");
        }
        other => panic!("expected a config error, got {other:?}"),
    }
    assert!(harness.gateway.get_server_names().is_empty());
}

// ============================================================================
// Statistics and warmup
// ============================================================================

#[tokio::test]
async fn test_statistics_reflect_states_and_requests() {
    let harness = GatewayTestHarness::new();
    let alpha = harness.add_with_tools("alpha", &["search"]).await;
    harness.add_with_tools("beta", &["index"]).await;
    harness.connector.script("core", ConnectScript::AlwaysFail);
    harness.gateway.add_server("core", strict("core")).await.unwrap();

    harness.gateway.execute_tool("search", None).await.unwrap();
    alpha.fail_calls(Some(SessionError::Remote("boom".into())));
    assert!(harness.gateway.execute_tool("search", None).await.is_err());

    let stats = harness.gateway.get_statistics();
    assert_eq!(stats.total_connections, 3);
    assert_eq!(stats.active_connections, 2);
    assert_eq!(stats.healthy_connections, 2);
    assert_eq!(stats.failed_connections, 1);
    assert_eq!(stats.failed_requests, 1);
    // Three listings on each Ready server plus the successful call
    assert_eq!(stats.successful_requests, 7);
    assert!(stats.average_response_time.is_some());
    assert!((stats.utilization_percent - 3.0 / 64.0 * 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_warmup_reports_failed_pings() {
    let harness = GatewayTestHarness::new();
    harness.add_with_tools("alpha", &["a1"]).await;
    let beta = harness.add_with_tools("beta", &["b1"]).await;
    beta.fail_pings(Some(SessionError::Transport("no route".into())));

    let report = harness.gateway.warmup().await;
    assert_eq!(report.warmed, vec!["alpha".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].server, "beta");
}

#[tokio::test]
async fn test_warmup_on_start_pings_every_server() {
    let harness = GatewayTestHarness::with_pool_config(PoolConfig {
        warmup_on_start: true,
        ..PoolConfig::default()
    });
    let alpha = harness.connector.serve("alpha", FakeSession::new());
    let servers = ServerConfigs::new().with("alpha", lenient("alpha"));

    harness.gateway.initialize_from_config(&servers).await.unwrap();
    assert_eq!(alpha.pings.load(std::sync::atomic::Ordering::SeqCst), 1);
}
