//! MCP transport connectors
//!
//! - Stdio: local process communication via a child process
//! - HTTP: remote server communication via Streamable HTTP
//! - SSE: served by the same Streamable HTTP client, which falls back to
//!   server-sent events on endpoints that stream responses

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

#[cfg(windows)]
#[allow(unused_imports)] // Trait is used via method call in closure
use std::os::windows::process::CommandExt;

use async_trait::async_trait;
use capmux_core::{
    ConnectionError, McpSession, ServerConfig, SessionConnector, TransportConfig, TransportFailure,
    TransportKind,
};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::session::{McpClientHandler, RmcpSession};

/// Opens rmcp sessions for any configured transport
#[derive(Debug, Clone, Default)]
pub struct RmcpConnector;

impl RmcpConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect_stdio(
        &self,
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<RmcpSession, ConnectionError> {
        // Commands copied from other clients often embed their arguments ("npx -y pkg")
        let (executable, parsed_args) =
            parse_command(command, args).map_err(|reason| ConnectionError::Configuration {
                server: server_name.to_string(),
                reason,
            })?;

        let command_path = which::which(&executable)
            .or_else(|_| which::which(format!("{}.exe", executable)))
            .map_err(|_| {
                let reason = format!(
                    "Command not found: {}. Ensure it's installed and in PATH.",
                    executable
                );
                error!(server = %server_name, "{}", reason);
                ConnectionError::Configuration {
                    server: server_name.to_string(),
                    reason,
                }
            })?;

        info!(
            server = %server_name,
            path = ?command_path,
            args = ?parsed_args,
            "[RmcpConnector] Spawning stdio server"
        );

        let env = env.clone();
        let transport = TokioChildProcess::new(Command::new(&command_path).configure(move |cmd| {
            cmd.args(&parsed_args)
                .envs(&env)
                .stderr(Stdio::null())
                .kill_on_drop(true);

            // Keep the child out of the parent's console (Windows) and
            // terminal process group (Unix).
            #[cfg(windows)]
            {
                const CREATE_NO_WINDOW: u32 = 0x08000000;
                cmd.creation_flags(CREATE_NO_WINDOW);
            }
            #[cfg(unix)]
            {
                cmd.process_group(0);
            }
        }))
        .map_err(|e| ConnectionError::Transport {
            server: server_name.to_string(),
            transport: TransportKind::Stdio,
            failure: TransportFailure::Spawn(e.to_string()),
        })?;

        let client = McpClientHandler::new(server_name)
            .serve(transport)
            .await
            .map_err(|e| ConnectionError::Transport {
                server: server_name.to_string(),
                transport: TransportKind::Stdio,
                failure: TransportFailure::Handshake(format!("{:#}", e)),
            })?;

        Ok(RmcpSession::new(server_name, client))
    }

    async fn connect_http(
        &self,
        server_name: &str,
        kind: TransportKind,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<RmcpSession, ConnectionError> {
        let configuration = |reason: String| ConnectionError::Configuration {
            server: server_name.to_string(),
            reason,
        };

        let header_map = build_default_headers(headers).map_err(configuration)?;
        debug!(
            server = %server_name,
            url = %url,
            header_count = header_map.len(),
            "[RmcpConnector] Connecting over HTTP"
        );

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| configuration(format!("Failed to build HTTP client: {}", e)))?;

        let transport_config = StreamableHttpClientTransportConfig::with_uri(url);
        let transport = StreamableHttpClientTransport::with_client(client, transport_config);

        let client = McpClientHandler::new(server_name)
            .serve(transport)
            .await
            .map_err(|e| ConnectionError::Transport {
                server: server_name.to_string(),
                transport: kind,
                failure: TransportFailure::Handshake(format!("{:#}", e)),
            })?;

        Ok(RmcpSession::new(server_name, client))
    }
}

#[async_trait]
impl SessionConnector for RmcpConnector {
    async fn connect(
        &self,
        server_name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<dyn McpSession>, ConnectionError> {
        let session = match &config.transport {
            TransportConfig::Stdio { command, args, env } => {
                self.connect_stdio(server_name, command, args, env).await?
            }
            TransportConfig::Http { url, headers } => {
                self.connect_http(server_name, TransportKind::Http, url, headers)
                    .await?
            }
            TransportConfig::Sse { url, headers } => {
                self.connect_http(server_name, TransportKind::Sse, url, headers)
                    .await?
            }
        };
        info!(
            server = %server_name,
            transport = %config.transport_kind(),
            "[RmcpConnector] Connected"
        );
        Ok(Arc::new(session))
    }
}

/// Split a command that may carry embedded arguments
///
/// - "docker run -i --rm image" → ("docker", ["run", "-i", "--rm", "image"])
/// - "node" with args ["server.js"] → ("node", ["server.js"])
///
/// Explicit args win: the command is then taken as the bare executable.
pub fn parse_command(command: &str, args: &[String]) -> Result<(String, Vec<String>), String> {
    if !args.is_empty() {
        return Ok((command.to_string(), args.to_vec()));
    }

    if !command.contains(' ') {
        return Ok((command.to_string(), Vec::new()));
    }

    let mut parts = shell_words::split(command)
        .map_err(|e| format!("Failed to parse command '{}': {}", command, e))?;
    if parts.is_empty() {
        return Err("Empty command after parsing".to_string());
    }
    let executable = parts.remove(0);
    Ok((executable, parts))
}

/// Build the default header map applied to every HTTP request
pub fn build_default_headers(
    headers: &HashMap<String, String>,
) -> Result<reqwest::header::HeaderMap, String> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| format!("Invalid header name '{}': {}", key, e))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| format!("Invalid header value for '{}': {}", key, e))?;
        header_map.insert(name, value);
    }
    Ok(header_map)
}
