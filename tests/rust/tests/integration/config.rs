//! Configuration documents driving a gateway

use capmux_core::{ConnectionMode, Error, GatewayConfig, TransportKind};
use capmux_gateway::McpGateway;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::Arc;
use tests::{FakeConnector, FakeSession};

const FLEET: &str = r#"{
    "pool": { "maxPoolSize": 4, "warmupOnStart": true },
    "mcpServers": {
        "zeta": {
            "command": "npx",
            "args": ["-y", "zeta-server"],
            "healthCheck": { "enabled": false }
        },
        "alpha": {
            "url": "https://alpha.example.com/mcp",
            "connectionMode": "strict",
            "healthCheck": { "enabled": false }
        }
    }
}"#;

#[tokio::test]
async fn test_declaration_order_decides_bare_names() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FLEET.as_bytes()).unwrap();

    let config = GatewayConfig::from_path(file.path()).await.unwrap();
    assert_eq!(config.pool.max_pool_size, 4);
    let names: Vec<&str> = config.servers.names().collect();
    assert_eq!(names, vec!["zeta", "alpha"]);

    let alpha = config.servers.get("alpha").unwrap();
    assert_eq!(alpha.transport_kind(), TransportKind::Http);
    assert_eq!(alpha.connection_mode, ConnectionMode::Strict);

    let connector = Arc::new(FakeConnector::new());
    connector.serve("zeta", FakeSession::new().with_tools(&["search"]));
    let alpha_session = connector.serve("alpha", FakeSession::new().with_tools(&["search"]));

    let gateway = McpGateway::from_config(connector.clone(), &config);
    let report = gateway.initialize(&config).await.unwrap();
    assert_eq!(report.ready, vec!["zeta".to_string(), "alpha".to_string()]);

    let tools: Vec<String> = gateway
        .get_all_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.exposed_name)
        .collect();
    assert_eq!(tools, vec!["search", "alpha.search"]);

    // warmupOnStart pinged each server once
    assert_eq!(alpha_session.pings.load(std::sync::atomic::Ordering::SeqCst), 1);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = GatewayConfig::from_path(dir.path().join("absent.json")).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_invalid_documents_are_rejected() {
    let cases = [
        r#"{ "mcpServers": { "x": { "command": "" } } }"#,
        r#"{ "mcpServers": { "x": { "url": "ftp://example.com" } } }"#,
        r#"{ "pool": { "maxPoolSize": 0 } }"#,
        r#"{ "mcpServers": [] }"#,
    ];
    for case in cases {
        let result = GatewayConfig::from_json_str(case);
        assert!(matches!(result, Err(Error::Config(_))), "accepted: {case}");
    }
}
