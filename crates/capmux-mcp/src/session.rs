//! `McpSession` over an rmcp client

use async_trait::async_trait;
use capmux_core::{
    JsonObject, McpSession, RemoteCapability, SessionError, SessionResult, ToolCallOutput,
};
use rmcp::{
    model::{
        CallToolRequestParams, ClientCapabilities, ClientInfo, GetPromptRequestParams,
        Implementation, Prompt, ReadResourceRequestParams, Resource, Tool,
    },
    service::{Peer, RunningService},
    ClientHandler, RoleClient, ServiceError,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Type alias for a connected rmcp client
pub type McpClient = RunningService<RoleClient, McpClientHandler>;

/// Client handler announcing capmux to the server
#[derive(Clone)]
pub struct McpClientHandler {
    info: ClientInfo,
}

impl McpClientHandler {
    pub fn new(server_name: &str) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("capmux-{}", server_name),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("Capmux".to_string()),
                    icons: None,
                    description: None,
                    website_url: None,
                },
                meta: None,
            },
        }
    }
}

impl ClientHandler for McpClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }
}

/// A connected rmcp session
///
/// Requests go through a cloned [`Peer`]; the running service itself is kept
/// only so it can be cancelled on disconnect.
pub struct RmcpSession {
    server_name: String,
    peer: Peer<RoleClient>,
    client: Mutex<Option<McpClient>>,
}

impl RmcpSession {
    pub fn new(server_name: impl Into<String>, client: McpClient) -> Self {
        let server_name = server_name.into();
        let peer = client.peer().clone();
        debug!(
            server = %server_name,
            peer_info = ?client.peer_info(),
            "[RmcpSession] Session established"
        );
        Self {
            server_name,
            peer,
            client: Mutex::new(Some(client)),
        }
    }
}

/// Map an rmcp service error onto the session error set
fn map_service_error(error: ServiceError) -> SessionError {
    match error {
        ServiceError::McpError(data) => SessionError::Remote(data.message.to_string()),
        ServiceError::TransportClosed => SessionError::Closed,
        other => SessionError::Transport(other.to_string()),
    }
}

fn tool_capability(tool: Tool) -> RemoteCapability {
    let raw = serde_json::to_value(&tool).unwrap_or(Value::Null);
    RemoteCapability {
        name: tool.name.to_string(),
        description: tool.description.as_ref().map(|d| d.to_string()),
        raw,
    }
}

fn prompt_capability(prompt: Prompt) -> RemoteCapability {
    let raw = serde_json::to_value(&prompt).unwrap_or(Value::Null);
    RemoteCapability {
        name: prompt.name.to_string(),
        description: prompt.description.as_ref().map(|d| d.to_string()),
        raw,
    }
}

fn resource_capability(resource: Resource) -> RemoteCapability {
    let raw = serde_json::to_value(&resource.raw).unwrap_or(Value::Null);
    RemoteCapability {
        name: resource.raw.uri.clone(),
        description: resource.raw.description.clone(),
        raw,
    }
}

#[async_trait]
impl McpSession for RmcpSession {
    async fn list_tools(&self) -> SessionResult<Vec<RemoteCapability>> {
        let tools = self.peer.list_all_tools().await.map_err(map_service_error)?;
        Ok(tools.into_iter().map(tool_capability).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> SessionResult<ToolCallOutput> {
        debug!(server = %self.server_name, tool = %name, "[RmcpSession] Calling tool");
        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments,
                task: None,
                meta: None,
            })
            .await
            .map_err(map_service_error)?;

        Ok(ToolCallOutput {
            content: result
                .content
                .into_iter()
                .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
                .collect(),
            is_error: result.is_error.unwrap_or(false),
        })
    }

    async fn list_prompts(&self) -> SessionResult<Vec<RemoteCapability>> {
        let prompts = self
            .peer
            .list_all_prompts()
            .await
            .map_err(map_service_error)?;
        Ok(prompts.into_iter().map(prompt_capability).collect())
    }

    async fn get_prompt(&self, name: &str, arguments: Option<JsonObject>) -> SessionResult<Value> {
        let result = self
            .peer
            .get_prompt(GetPromptRequestParams {
                name: name.to_string().into(),
                arguments,
                meta: None,
            })
            .await
            .map_err(map_service_error)?;
        serde_json::to_value(result).map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn list_resources(&self) -> SessionResult<Vec<RemoteCapability>> {
        let resources = self
            .peer
            .list_all_resources()
            .await
            .map_err(map_service_error)?;
        Ok(resources.into_iter().map(resource_capability).collect())
    }

    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<Value>> {
        let result = self
            .peer
            .read_resource(ReadResourceRequestParams {
                uri: uri.to_string().into(),
                meta: None,
            })
            .await
            .map_err(map_service_error)?;
        Ok(result
            .contents
            .into_iter()
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
            .collect())
    }

    async fn ping(&self) -> SessionResult<()> {
        self.peer
            .list_tools(Default::default())
            .await
            .map(|_| ())
            .map_err(map_service_error)
    }

    async fn disconnect(&self) -> SessionResult<()> {
        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };
        info!(server = %self.server_name, "[RmcpSession] Disconnecting");
        if let Err(e) = client.cancel().await {
            warn!(server = %self.server_name, error = %e, "[RmcpSession] Cancel failed");
            return Err(SessionError::Transport(e.to_string()));
        }
        Ok(())
    }
}
