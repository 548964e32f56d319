//! Capabilities advertised by servers (tools, prompts, resources)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Prompt => "prompt",
            Self::Resource => "resource",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability as reported by one server's listing call
///
/// `name` is the tool or prompt name, or the URI for resources. `raw` keeps
/// the full protocol object (input schema, arguments, mime type...) so it can
/// be handed to the agent unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCapability {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub raw: Value,
}

impl RemoteCapability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            raw: Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }
}

/// Everything one server advertises
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityListing {
    pub tools: Vec<RemoteCapability>,
    pub prompts: Vec<RemoteCapability>,
    pub resources: Vec<RemoteCapability>,
}

impl CapabilityListing {
    pub fn total_count(&self) -> usize {
        self.tools.len() + self.prompts.len() + self.resources.len()
    }

    pub fn of_kind(&self, kind: CapabilityKind) -> &[RemoteCapability] {
        match kind {
            CapabilityKind::Tool => &self.tools,
            CapabilityKind::Prompt => &self.prompts,
            CapabilityKind::Resource => &self.resources,
        }
    }
}

/// A capability placed in the aggregated catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub kind: CapabilityKind,
    /// Name (or URI) as advertised by the owning server
    pub name: String,
    pub server_name: String,
    /// Name under which the agent sees this capability
    pub exposed_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl CapabilityDescriptor {
    pub fn from_remote(
        kind: CapabilityKind,
        server_name: &str,
        exposed_name: String,
        remote: &RemoteCapability,
    ) -> Self {
        Self {
            kind,
            name: remote.name.clone(),
            server_name: server_name.to_string(),
            exposed_name,
            description: remote.description.clone(),
            payload: remote.raw.clone(),
        }
    }

    /// True when the exposed name had to be qualified with the server name
    pub fn is_prefixed(&self) -> bool {
        self.exposed_name != self.name
    }
}

/// Result of a tool invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallOutput {
    pub content: Vec<Value>,
    pub is_error: bool,
}

impl ToolCallOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![serde_json::json!({ "type": "text", "text": text.into() })],
            is_error: false,
        }
    }
}
