//! Registry manifest model.
//!
//! Field order of the structs below is the canonical serialization order;
//! the registry signature covers those exact bytes.

mod builder;

pub use builder::{ManifestBuilder, derive_name, normalize_tags};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::introspect::CapabilityCategory;

/// Registry schema version carried by every manifest.
pub const PROTOCOL_VERSION: &str = "mcp/1.0";

/// Tag for servers whose capabilities could not be introspected.
pub const TAG_UNANALYZED: &str = "unanalyzed";

/// Tag for servers that refused unauthenticated introspection.
pub const TAG_AUTH_REQUIRED: &str = "auth-required";

/// Default environment variable name for a server credential.
pub const DEFAULT_KEY_NAME: &str = "API_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub description: String,
    pub url: String,
    pub protocol_version: String,
    pub capabilities: Vec<Capability>,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation: Option<Installation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthRequirement>,
}

impl Manifest {
    /// Compact JSON in field order. This is the submitted and signed body.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CapabilityCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How to launch a package server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub command: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
    ApiKey,
    Oauth,
    Custom,
}

impl AuthType {
    pub const ALL: [AuthType; 3] = [Self::ApiKey, Self::Oauth, Self::Custom];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api-key",
            Self::Oauth => "oauth",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequirement {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

/// What the operator said about the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorMetadata {
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// `Some` iff the operator indicated a credential is required
    pub auth: Option<AuthDetails>,
}

impl OperatorMetadata {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth(mut self, auth: AuthDetails) -> Self {
        self.auth = Some(auth);
        self
    }
}

/// Operator-supplied credential details. Unset fields fall back to the
/// probe's inference and then to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthDetails {
    pub auth_type: Option<AuthType>,
    pub key_name: Option<String>,
    pub instructions: Option<String>,
}
