//! Aggregated catalog tests
//!
//! Name assignment across servers, partial failures, dispatch and
//! invalidation.

use capmux_core::{CapabilityKind, ConnectionState, Error, SessionError};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::fixtures::{fast_health, lenient};
use tests::{FakeSession, GatewayTestHarness};

// ============================================================================
// Naming
// ============================================================================

#[tokio::test]
async fn test_first_server_keeps_bare_name() {
    let harness = GatewayTestHarness::new();
    harness.add_with_tools("alpha", &["search", "fetch"]).await;
    harness.add_with_tools("beta", &["search", "index"]).await;

    assert_eq!(
        harness.tool_names().await,
        vec!["search", "fetch", "beta.search", "index"]
    );

    let tools = harness.gateway.get_all_tools().await.unwrap();
    let prefixed = tools.iter().find(|t| t.exposed_name == "beta.search").unwrap();
    assert_eq!(prefixed.name, "search");
    assert_eq!(prefixed.server_name, "beta");
    assert!(prefixed.is_prefixed());
    assert_eq!(prefixed.payload["inputSchema"]["type"], "object");
}

#[tokio::test]
async fn test_prefixed_name_dispatches_to_owner() {
    let harness = GatewayTestHarness::new();
    let alpha = harness.add_with_tools("alpha", &["search"]).await;
    let beta = harness.add_with_tools("beta", &["search"]).await;

    let mut args = serde_json::Map::new();
    args.insert("query".into(), json!("rust"));
    let output = harness
        .gateway
        .execute_tool("beta.search", Some(args))
        .await
        .unwrap();

    assert!(!output.is_error);
    assert_eq!(output.content[0]["text"], "search");
    assert_eq!(output.content[0]["arguments"]["query"], "rust");
    assert_eq!(alpha.tool_call_count(), 0);
    assert_eq!(beta.tool_call_count(), 1);
}

#[tokio::test]
async fn test_removing_first_owner_does_not_rename_others() {
    let harness = GatewayTestHarness::new();
    harness.add_with_tools("alpha", &["search"]).await;
    harness.add_with_tools("beta", &["search", "index"]).await;
    assert_eq!(harness.tool_names().await, vec!["search", "beta.search", "index"]);

    harness.gateway.remove_server("alpha").await.unwrap();
    assert_eq!(harness.tool_names().await, vec!["beta.search", "index"]);

    // The freed bare name goes to the next newcomer
    harness.add_with_tools("gamma", &["search"]).await;
    assert_eq!(
        harness.tool_names().await,
        vec!["beta.search", "index", "search"]
    );
}

#[tokio::test]
async fn test_tools_and_prompts_are_named_independently() {
    let harness = GatewayTestHarness::new();
    harness
        .add(
            "alpha",
            FakeSession::new().with_tools(&["summarize"]),
            lenient("alpha"),
        )
        .await;
    harness
        .add(
            "beta",
            FakeSession::new().with_prompts(&["summarize"]),
            lenient("beta"),
        )
        .await;

    let prompts = harness.gateway.get_all_prompts().await.unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].exposed_name, "summarize");
    assert_eq!(prompts[0].kind, CapabilityKind::Prompt);
}

// ============================================================================
// Partial failure
// ============================================================================

#[tokio::test]
async fn test_failing_servers_are_excluded() {
    let harness = GatewayTestHarness::new();
    let alpha = harness.add_with_tools("alpha", &["a1"]).await;
    harness.add_with_tools("beta", &["b1"]).await;
    let gamma = harness.add_with_tools("gamma", &["g1"]).await;

    alpha.fail_listing(Some(SessionError::Transport("broken pipe".into())));
    gamma.fail_listing(Some(SessionError::Transport("broken pipe".into())));

    assert_eq!(harness.tool_names().await, vec!["b1"]);
    let catalog = harness.gateway.aggregator().catalog();
    assert_eq!(catalog.servers(), &["beta".to_string()]);
    // The excluded servers are tried again on the next read
    assert!(harness.gateway.aggregator().is_stale());
}

#[tokio::test]
async fn test_excluded_server_returns_once_listing_recovers() {
    let harness = GatewayTestHarness::new();
    let alpha = harness.add_with_tools("alpha", &["a1"]).await;
    harness.add_with_tools("beta", &["b1"]).await;

    alpha.fail_listing(Some(SessionError::Transport("broken pipe".into())));
    assert_eq!(harness.tool_names().await, vec!["b1"]);

    alpha.fail_listing(None);
    assert_eq!(harness.tool_names().await, vec!["a1", "b1"]);
    assert!(!harness.gateway.aggregator().is_stale());

    // Dispatch reaches the returning server without a lookup miss
    harness.gateway.execute_tool("a1", None).await.unwrap();
    assert_eq!(alpha.tool_call_count(), 1);
}

#[tokio::test]
async fn test_all_servers_failing_is_an_error() {
    let harness = GatewayTestHarness::new();
    let alpha = harness.add_with_tools("alpha", &["a1"]).await;
    let beta = harness.add_with_tools("beta", &["b1"]).await;

    alpha.fail_listing(Some(SessionError::Transport("broken pipe".into())));
    beta.fail_listing(Some(SessionError::Closed));

    match harness.gateway.get_all_tools().await {
        Err(Error::AllServersFailed { failures }) => {
            let mut servers: Vec<_> = failures.iter().map(|f| f.server.as_str()).collect();
            servers.sort();
            assert_eq!(servers, vec!["alpha", "beta"]);
        }
        other => panic!("expected AllServersFailed, got {:?}", other.map(|t| t.len())),
    }
}

#[tokio::test]
async fn test_empty_pool_yields_empty_catalog() {
    let harness = GatewayTestHarness::new();
    assert!(harness.gateway.get_all_tools().await.unwrap().is_empty());
    assert!(harness.gateway.get_all_resources().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_prompts_yield_empty_list() {
    let harness = GatewayTestHarness::new();
    let alpha = harness.add_with_tools("alpha", &["search"]).await;
    alpha.set_prompts_unsupported(true);

    assert!(harness.gateway.get_all_prompts().await.unwrap().is_empty());
    assert!(harness.gateway.get_all_resources().await.unwrap().is_empty());
    assert_eq!(harness.tool_names().await, vec!["search"]);
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_unknown_tool_has_no_provider() {
    let harness = GatewayTestHarness::new();
    harness.add_with_tools("alpha", &["search"]).await;

    let result = harness.gateway.execute_tool("missing", None).await;
    assert!(matches!(
        result,
        Err(Error::NoProvider { kind: CapabilityKind::Tool, name }) if name == "missing"
    ));
}

#[tokio::test]
async fn test_removed_server_tools_have_no_provider() {
    let harness = GatewayTestHarness::new();
    let alpha = harness.add_with_tools("alpha", &["search"]).await;
    harness.add_with_tools("beta", &["index"]).await;
    harness.gateway.get_all_tools().await.unwrap();

    harness.gateway.remove_server("alpha").await.unwrap();

    let result = harness.gateway.execute_tool("search", None).await;
    assert!(matches!(result, Err(Error::NoProvider { .. })));
    assert_eq!(alpha.tool_call_count(), 0);
}

#[tokio::test]
async fn test_new_server_is_found_without_explicit_refresh() {
    let harness = GatewayTestHarness::new();
    harness.add_with_tools("alpha", &["search"]).await;
    harness.gateway.get_all_tools().await.unwrap();

    let beta = harness.add_with_tools("beta", &["index"]).await;
    harness.gateway.execute_tool("index", None).await.unwrap();
    assert_eq!(beta.tool_call_count(), 1);
}

#[tokio::test]
async fn test_prompt_and_resource_dispatch() {
    let harness = GatewayTestHarness::new();
    let docs = harness
        .add(
            "docs",
            FakeSession::new()
                .with_prompts(&["greet"])
                .with_resources(&["file:///readme.md"]),
            lenient("docs"),
        )
        .await;

    let prompt = harness.gateway.get_prompt("greet", None).await.unwrap();
    assert_eq!(prompt["description"], "greet");

    let contents = harness
        .gateway
        .read_resource("file:///readme.md")
        .await
        .unwrap();
    assert_eq!(contents[0]["uri"], "file:///readme.md");

    assert_eq!(docs.prompt_gets.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(docs.resource_reads.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_owner_is_not_ready() {
    let mut harness = GatewayTestHarness::new();
    let config = lenient("alpha").with_health_check(fast_health(100));
    let alpha = harness
        .add("alpha", FakeSession::new().with_tools(&["search"]), config)
        .await;
    harness.gateway.get_all_tools().await.unwrap();

    alpha.fail_pings(Some(SessionError::Transport("ping timed out".into())));
    harness.wait_for_state("alpha", ConnectionState::Degraded).await;

    let result = harness.gateway.execute_tool("search", None).await;
    assert!(matches!(
        result,
        Err(Error::NotReady { state: ConnectionState::Degraded, .. })
    ));
    assert_eq!(alpha.tool_call_count(), 0);

    // Degraded servers drop out of the next listing
    assert!(harness.tool_names().await.is_empty());
}

#[tokio::test]
async fn test_catalog_rebuilds_only_when_stale() {
    let harness = GatewayTestHarness::new();
    let alpha = harness.add_with_tools("alpha", &["search"]).await;

    harness.gateway.get_all_tools().await.unwrap();
    let after_first = alpha.listings.load(std::sync::atomic::Ordering::SeqCst);
    harness.gateway.get_all_tools().await.unwrap();
    assert_eq!(
        alpha.listings.load(std::sync::atomic::Ordering::SeqCst),
        after_first
    );

    harness.gateway.aggregator().invalidate();
    harness.gateway.get_all_tools().await.unwrap();
    assert!(alpha.listings.load(std::sync::atomic::Ordering::SeqCst) > after_first);
}
