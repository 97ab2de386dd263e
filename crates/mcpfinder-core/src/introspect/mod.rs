//! Capability discovery over an established session.
//!
//! The handshake is `initialize` followed by `notifications/initialized`.
//! Listing calls are only issued for the categories the server advertised.

mod snapshot;

pub use snapshot::{
    CapabilityCategory, CapabilitySnapshot, IntrospectedServer, PromptInfo, ResourceInfo,
    ToolInfo,
};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{IntrospectionFailure, TransportError};
use crate::transport::Session;

/// Protocol revision offered in `initialize`.
pub const CLIENT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Upper bound on `nextCursor` pages per listing.
const MAX_PAGES: usize = 50;

/// Whether a server offers a capability category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Support {
    #[default]
    Unsupported,
    Supported,
}

impl Support {
    fn from_field(field: &Option<Value>) -> Self {
        match field {
            Some(Value::Null) | None => Self::Unsupported,
            Some(_) => Self::Supported,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported)
    }
}

/// Categories advertised in the initialize result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub tools: Support,
    pub resources: Support,
    pub prompts: Support,
}

impl ServerCapabilities {
    pub fn supports(&self, category: CapabilityCategory) -> bool {
        match category {
            CapabilityCategory::Tool => self.tools.is_supported(),
            CapabilityCategory::Resource => self.resources.is_supported(),
            CapabilityCategory::Prompt => self.prompts.is_supported(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    #[serde(default)]
    protocol_version: Option<String>,
    #[serde(default)]
    capabilities: RawCapabilities,
    #[serde(default)]
    server_info: Option<ServerInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCapabilities {
    #[serde(default)]
    tools: Option<Value>,
    #[serde(default)]
    resources: Option<Value>,
    #[serde(default)]
    prompts: Option<Value>,
}

impl From<&RawCapabilities> for ServerCapabilities {
    fn from(raw: &RawCapabilities) -> Self {
        Self {
            tools: Support::from_field(&raw.tools),
            resources: Support::from_field(&raw.resources),
            prompts: Support::from_field(&raw.prompts),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(default)]
    name: Option<String>,
    uri: String,
    #[serde(default)]
    description: Option<String>,
}

impl From<RawResource> for ResourceInfo {
    fn from(raw: RawResource) -> Self {
        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| raw.uri.clone());
        Self {
            name,
            uri: raw.uri,
            description: raw.description,
        }
    }
}

/// Run the discovery handshake and listings on `session`.
pub async fn introspect(session: &mut Session) -> Result<IntrospectedServer, IntrospectionFailure> {
    let params = json!({
        "protocolVersion": CLIENT_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcpfinder",
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let result = session
        .request("initialize", Some(params))
        .await
        .map_err(|e| IntrospectionFailure::new("initialize", e))?;
    let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
        IntrospectionFailure::new(
            "initialize",
            TransportError::Protocol(format!("malformed initialize result: {e}")),
        )
    })?;
    let capabilities = ServerCapabilities::from(&init.capabilities);

    tracing::debug!(?capabilities, protocol = ?init.protocol_version, "server initialized");

    session
        .notify("notifications/initialized", None)
        .await
        .map_err(|e| IntrospectionFailure::new("notifications/initialized", e))?;

    let mut server = IntrospectedServer {
        server_name: init
            .server_info
            .as_ref()
            .and_then(|info| info.name.clone())
            .filter(|name| !name.trim().is_empty()),
        server_version: init.server_info.as_ref().and_then(|info| info.version.clone()),
        protocol_version: init.protocol_version,
        ..Default::default()
    };

    if capabilities.tools.is_supported() {
        server.tools = list_all(session, "tools/list", "tools").await?;
    }
    if capabilities.resources.is_supported() {
        server.resources = list_all::<RawResource>(session, "resources/list", "resources")
            .await?
            .into_iter()
            .map(ResourceInfo::from)
            .collect();
    }
    if capabilities.prompts.is_supported() {
        server.prompts = list_all(session, "prompts/list", "prompts").await?;
    }

    tracing::info!(
        server = ?server.server_name,
        tools = server.tools.len(),
        resources = server.resources.len(),
        prompts = server.prompts.len(),
        "introspection complete"
    );
    Ok(server)
}

/// Collect every page of a listing call. Entries that do not parse are
/// skipped.
async fn list_all<T: DeserializeOwned>(
    session: &mut Session,
    method: &'static str,
    key: &str,
) -> Result<Vec<T>, IntrospectionFailure> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let result = session
            .request(method, params)
            .await
            .map_err(|e| IntrospectionFailure::new(method, e))?;

        if let Some(entries) = result.get(key).and_then(Value::as_array) {
            for entry in entries {
                match serde_json::from_value::<T>(entry.clone()) {
                    Ok(item) => items.push(item),
                    Err(e) => tracing::debug!(method, error = %e, "skipping malformed entry"),
                }
            }
        }

        cursor = result
            .get("nextCursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if cursor.is_none() {
            return Ok(items);
        }
    }

    tracing::warn!(method, pages = MAX_PAGES, "listing truncated");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::error::FailureCause;
    use crate::locator::Locator;
    use crate::transport::McpTransport;

    /// Answers each method from a queue of canned results.
    struct CannedTransport {
        responses: HashMap<String, VecDeque<Result<Value, TransportError>>>,
        calls: Arc<Mutex<Vec<(String, Option<Value>)>>>,
    }

    impl CannedTransport {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn respond(mut self, method: &str, result: Result<Value, TransportError>) -> Self {
            self.responses
                .entry(method.to_string())
                .or_default()
                .push_back(result);
            self
        }
    }

    #[async_trait]
    impl McpTransport for CannedTransport {
        async fn request(
            &mut self,
            method: &str,
            params: Option<Value>,
        ) -> Result<Value, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            self.responses
                .get_mut(method)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(TransportError::Protocol(format!("unexpected {method}"))))
        }

        async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn session(transport: CannedTransport) -> Session {
        Session::new(
            Locator::parse("https://example.com/mcp").unwrap(),
            Box::new(transport),
        )
    }

    #[tokio::test]
    async fn test_only_advertised_categories_are_listed() {
        let transport = CannedTransport::new()
            .respond(
                "initialize",
                Ok(json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "weather", "version": "1.2.0"}
                })),
            )
            .respond(
                "tools/list",
                Ok(json!({"tools": [
                    {"name": "forecast", "description": "Get a forecast"},
                    {"description": "missing name"}
                ]})),
            );
        let calls = transport.calls.clone();

        let server = introspect(&mut session(transport)).await.unwrap();

        assert_eq!(server.server_name.as_deref(), Some("weather"));
        assert_eq!(server.server_version.as_deref(), Some("1.2.0"));
        assert_eq!(server.tools.len(), 1);
        assert!(server.resources.is_empty());

        let methods: Vec<String> = calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list"]
        );
    }

    #[tokio::test]
    async fn test_pagination_follows_next_cursor() {
        let transport = CannedTransport::new()
            .respond(
                "initialize",
                Ok(json!({"capabilities": {"resources": {"subscribe": false}}})),
            )
            .respond(
                "resources/list",
                Ok(json!({
                    "resources": [{"uri": "file:///a.txt"}],
                    "nextCursor": "page-2"
                })),
            )
            .respond(
                "resources/list",
                Ok(json!({"resources": [{"uri": "file:///b.txt", "name": "b"}]})),
            );
        let calls = transport.calls.clone();

        let server = introspect(&mut session(transport)).await.unwrap();

        assert_eq!(server.resources.len(), 2);
        assert_eq!(server.resources[0].name, "file:///a.txt");
        assert_eq!(server.resources[1].name, "b");
        assert!(server.server_name.is_none());

        let calls = calls.lock().unwrap();
        assert_eq!(calls[3].1, Some(json!({"cursor": "page-2"})));
    }

    #[tokio::test]
    async fn test_authorization_failure_on_initialize() {
        let transport = CannedTransport::new().respond(
            "initialize",
            Err(TransportError::Unauthorized {
                status: 401,
                challenge: Some("Bearer".to_string()),
                body: String::new(),
            }),
        );

        let failure = introspect(&mut session(transport)).await.unwrap_err();
        assert_eq!(failure.stage, "initialize");
        assert_eq!(failure.cause(), FailureCause::Authorization);
        assert_eq!(failure.challenge(), Some("Bearer"));
    }

    #[tokio::test]
    async fn test_listing_failure_is_other() {
        let transport = CannedTransport::new()
            .respond("initialize", Ok(json!({"capabilities": {"prompts": {}}})))
            .respond(
                "prompts/list",
                Err(TransportError::Rpc {
                    code: -32603,
                    message: "internal error".to_string(),
                }),
            );

        let failure = introspect(&mut session(transport)).await.unwrap_err();
        assert_eq!(failure.stage, "prompts/list");
        assert_eq!(failure.cause(), FailureCause::Other);
    }

    #[test]
    fn test_null_capability_is_unsupported() {
        let raw: RawCapabilities =
            serde_json::from_value(json!({"tools": null, "prompts": {"listChanged": true}}))
                .unwrap();
        let caps = ServerCapabilities::from(&raw);
        assert!(!caps.supports(CapabilityCategory::Tool));
        assert!(!caps.supports(CapabilityCategory::Resource));
        assert!(caps.supports(CapabilityCategory::Prompt));
    }
}
