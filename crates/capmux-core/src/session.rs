//! Session ports
//!
//! [`McpSession`] is the fixed set of operations capmux needs from a live
//! protocol session. [`SessionConnector`] opens one. The `capmux-mcp` crate
//! implements both on top of `rmcp`; tests substitute in-memory fakes.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::domain::{RemoteCapability, ServerConfig, ToolCallOutput};
use crate::error::{ConnectionError, SessionError};

/// JSON object used for tool and prompt arguments
pub type JsonObject = Map<String, Value>;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// One live session to one server
#[async_trait]
pub trait McpSession: Send + Sync {
    async fn list_tools(&self) -> SessionResult<Vec<RemoteCapability>>;

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>)
        -> SessionResult<ToolCallOutput>;

    async fn list_prompts(&self) -> SessionResult<Vec<RemoteCapability>>;

    /// Returns the rendered prompt (description and messages) as JSON
    async fn get_prompt(&self, name: &str, arguments: Option<JsonObject>) -> SessionResult<Value>;

    async fn list_resources(&self) -> SessionResult<Vec<RemoteCapability>>;

    /// Returns the resource contents as JSON objects
    async fn read_resource(&self, uri: &str) -> SessionResult<Vec<Value>>;

    /// Cheap liveness probe
    async fn ping(&self) -> SessionResult<()>;

    /// Close the session. Calling it twice is harmless.
    async fn disconnect(&self) -> SessionResult<()>;
}

/// Opens sessions for a given server configuration
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Establish a session
    ///
    /// Implementations report unusable configuration (missing command,
    /// malformed url or headers) as [`ConnectionError::Configuration`] so it
    /// is never retried.
    async fn connect(
        &self,
        server_name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<dyn McpSession>, ConnectionError>;
}
