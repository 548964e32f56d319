//! # Capmux MCP Library
//!
//! rmcp-backed implementations of the capmux session ports.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      RmcpConnector                       │
//! │  ┌──────────────────┐  ┌──────────────────────────────┐  │
//! │  │ TokioChildProcess│  │ StreamableHttpClientTransport│  │
//! │  │  (stdio)         │  │  (http, sse)                 │  │
//! │  └──────────────────┘  └──────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//!               RmcpSession: impl McpSession
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use capmux_core::{ServerConfig, SessionConnector};
//! use capmux_mcp::RmcpConnector;
//!
//! let connector = RmcpConnector::new();
//! let config = ServerConfig::stdio("npx", vec!["-y".into(), "@modelcontextprotocol/server-everything".into()]);
//! let session = connector.connect("everything", &config).await?;
//! let tools = session.list_tools().await?;
//! ```

pub mod session;
pub mod transports;

pub use session::{McpClient, McpClientHandler, RmcpSession};
pub use transports::{build_default_headers, parse_command, RmcpConnector};
