//! capmux - connect the configured MCP servers and print their merged tools
//!
//! Usage: `capmux <config.json> [log-dir]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use capmux_core::GatewayConfig;
use capmux_gateway::{init_tracing, LoggingConfig, McpGateway};
use capmux_mcp::RmcpConnector;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next().map(PathBuf::from) else {
        bail!("usage: capmux <config.json> [log-dir]");
    };

    let mut logging = LoggingConfig::default();
    if let Some(dir) = args.next() {
        logging = logging.with_log_dir(dir);
    }
    let _log_guard = init_tracing(logging)?;

    let config = GatewayConfig::from_path(&config_path)
        .await
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!(
        path = %config_path.display(),
        servers = config.servers.len(),
        "[capmux] Configuration loaded"
    );

    let gateway = McpGateway::from_config(Arc::new(RmcpConnector::new()), &config);
    let report = match gateway.initialize(&config).await {
        Ok(report) => report,
        Err(e) => {
            gateway.shutdown().await;
            return Err(e).context("startup failed");
        }
    };
    for failure in &report.failed {
        warn!(server = %failure.server, error = %failure.error, "[capmux] Server unavailable");
    }

    match gateway.get_all_tools().await {
        Ok(tools) => println!("{}", serde_json::to_string_pretty(&tools)?),
        Err(e) => warn!(error = %e, "[capmux] Could not build tool catalog"),
    }

    info!("[capmux] Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("[capmux] Shutting down");
    gateway.shutdown().await;
    Ok(())
}
