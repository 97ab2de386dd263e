//! Capability snapshot types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A capability category an MCP server can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityCategory {
    Tool,
    Resource,
    Prompt,
}

impl CapabilityCategory {
    pub const ALL: [CapabilityCategory; 3] = [Self::Tool, Self::Resource, Self::Prompt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }

    /// Plural label for prompts and tables.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Resource => "resources",
            Self::Prompt => "prompts",
        }
    }
}

impl fmt::Display for CapabilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Falls back to `uri` when the server omits a name.
    pub name: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Everything a successful introspection learned about a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntrospectedServer {
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    /// Protocol version the server negotiated during initialize
    pub protocol_version: Option<String>,
    pub tools: Vec<ToolInfo>,
    pub resources: Vec<ResourceInfo>,
    pub prompts: Vec<PromptInfo>,
}

impl IntrospectedServer {
    pub fn capability_count(&self) -> usize {
        self.tools.len() + self.resources.len() + self.prompts.len()
    }
}

/// What is known about a server's capabilities at manifest build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CapabilitySnapshot {
    /// Introspection succeeded.
    Full(IntrospectedServer),
    /// The operator declared which categories exist, without detail.
    Placeholder { categories: Vec<CapabilityCategory> },
    /// Authorization blocked introspection and nothing was declared.
    Unknown,
}

impl CapabilitySnapshot {
    /// Build a placeholder, sorting and deduplicating the categories.
    pub fn placeholder(categories: impl IntoIterator<Item = CapabilityCategory>) -> Self {
        let mut categories: Vec<_> = categories.into_iter().collect();
        categories.sort();
        categories.dedup();
        Self::Placeholder { categories }
    }

    pub fn state(&self) -> &'static str {
        match self {
            Self::Full(_) => "full",
            Self::Placeholder { .. } => "placeholder",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    pub fn server(&self) -> Option<&IntrospectedServer> {
        match self {
            Self::Full(server) => Some(server),
            _ => None,
        }
    }
}
