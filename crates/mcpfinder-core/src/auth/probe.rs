//! Credential-free metadata probe.
//!
//! When introspection is refused, a handful of unauthenticated requests
//! usually still reveal how the server expects to be authenticated. None of
//! them is required to succeed.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::ProbeFailure;
use crate::locator::Locator;
use crate::manifest::AuthType;

/// Origin sent with the CORS preflight.
const PREFLIGHT_ORIGIN: &str = "https://mcpfinder.dev";

const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Longest error message kept from a handshake response body.
const MAX_ERROR_LEN: usize = 300;

/// Best-effort metadata gathered without credentials. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthProbe {
    /// `access-control-*` headers from the preflight
    pub cors: BTreeMap<String, String>,
    /// `<title>` of the origin root page
    pub page_title: Option<String>,
    pub www_authenticate: Option<String>,
    /// Status of the deliberately invalid handshake
    pub handshake_status: Option<u16>,
    /// Error text from the handshake response body
    pub error_message: Option<String>,
    /// From the OAuth protected-resource metadata document
    pub authorization_servers: Vec<String>,
}

impl AuthProbe {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Keep the challenge seen during introspection when the probe got none.
    pub fn merge_challenge(&mut self, challenge: Option<&str>) {
        if self.www_authenticate.is_none() {
            self.www_authenticate = challenge.map(str::to_string);
        }
    }

    /// Guess the credential type from what the server revealed.
    pub fn inferred_auth_type(&self) -> Option<AuthType> {
        if !self.authorization_servers.is_empty() {
            return Some(AuthType::Oauth);
        }

        let challenge = self.www_authenticate.as_deref()?.trim();
        let lower = challenge.to_ascii_lowercase();
        let scheme = lower.split_whitespace().next().unwrap_or_default();

        match scheme {
            "bearer" | "bearer," => {
                if lower.contains("resource_metadata")
                    || lower.contains("authorization_uri")
                    || lower.contains("oauth")
                {
                    Some(AuthType::Oauth)
                } else {
                    Some(AuthType::ApiKey)
                }
            }
            "" => None,
            _ => Some(AuthType::Custom),
        }
    }

    /// Human-readable findings, one per line.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(title) = &self.page_title {
            lines.push(format!("Page title: {title}"));
        }
        if let Some(challenge) = &self.www_authenticate {
            lines.push(format!("WWW-Authenticate: {challenge}"));
        }
        if let Some(status) = self.handshake_status {
            match &self.error_message {
                Some(message) => lines.push(format!("Handshake: HTTP {status} ({message})")),
                None => lines.push(format!("Handshake: HTTP {status}")),
            }
        }
        if !self.authorization_servers.is_empty() {
            lines.push(format!(
                "OAuth authorization servers: {}",
                self.authorization_servers.join(", ")
            ));
        }
        for (name, value) in &self.cors {
            lines.push(format!("{name}: {value}"));
        }
        lines
    }
}

/// Collects an [`AuthProbe`] for a locator.
#[async_trait]
pub trait AuthProber: Send + Sync {
    async fn probe(&self, locator: &Locator) -> AuthProbe;
}

/// Probes endpoints over HTTP. Package locators yield an empty probe.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeFailure> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mcpfinder/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeFailure::Request(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    async fn bounded<T>(
        &self,
        probe: impl Future<Output = Result<T, ProbeFailure>>,
    ) -> Result<T, ProbeFailure> {
        tokio::time::timeout(self.timeout, probe)
            .await
            .map_err(|_| ProbeFailure::Timeout(self.timeout))?
    }

    async fn preflight(&self, url: &Url) -> Result<BTreeMap<String, String>, ProbeFailure> {
        let response = self
            .client
            .request(reqwest::Method::OPTIONS, url.clone())
            .header(header::ORIGIN, PREFLIGHT_ORIGIN)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(
                header::ACCESS_CONTROL_REQUEST_HEADERS,
                "authorization, content-type",
            )
            .send()
            .await
            .map_err(request_failed)?;
        Ok(cors_headers(response.headers()))
    }

    async fn page_title(&self, url: &Url) -> Result<Option<String>, ProbeFailure> {
        let root = url.join("/").map_err(|e| ProbeFailure::Unusable(e.to_string()))?;
        let response = self.client.get(root).send().await.map_err(request_failed)?;
        let body = response.text().await.map_err(request_failed)?;
        Ok(extract_title(&body))
    }

    async fn protected_resource(&self, url: &Url) -> Result<Vec<String>, ProbeFailure> {
        let metadata = url
            .join(PROTECTED_RESOURCE_PATH)
            .map_err(|e| ProbeFailure::Unusable(e.to_string()))?;
        let response = self.client.get(metadata).send().await.map_err(request_failed)?;
        if !response.status().is_success() {
            return Err(ProbeFailure::Unusable(format!("HTTP {}", response.status())));
        }
        let document: Value = response.json().await.map_err(request_failed)?;
        Ok(document
            .get("authorization_servers")
            .and_then(Value::as_array)
            .map(|servers| {
                servers
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn invalid_handshake(&self, url: &Url) -> Result<HandshakeProbe, ProbeFailure> {
        let response = self
            .client
            .post(url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .body(r#"{"jsonrpc":"2.0","method":"initialize"}"#)
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status().as_u16();
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(request_failed)?;

        Ok(HandshakeProbe {
            status,
            challenge,
            error_message: extract_error_message(&body),
        })
    }
}

#[async_trait]
impl AuthProber for HttpProber {
    async fn probe(&self, locator: &Locator) -> AuthProbe {
        let Some(url) = locator.url() else {
            return AuthProbe::default();
        };

        tracing::debug!(url = %url, "probing for auth metadata");
        let (cors, title, oauth, handshake) = tokio::join!(
            self.bounded(self.preflight(url)),
            self.bounded(self.page_title(url)),
            self.bounded(self.protected_resource(url)),
            self.bounded(self.invalid_handshake(url)),
        );

        let mut probe = AuthProbe::default();
        match cors {
            Ok(cors) => probe.cors = cors,
            Err(e) => tracing::debug!(error = %e, "CORS preflight probe failed"),
        }
        match title {
            Ok(title) => probe.page_title = title,
            Err(e) => tracing::debug!(error = %e, "page title probe failed"),
        }
        match oauth {
            Ok(servers) => probe.authorization_servers = servers,
            Err(e) => tracing::debug!(error = %e, "protected resource probe failed"),
        }
        match handshake {
            Ok(handshake) => {
                probe.handshake_status = Some(handshake.status);
                probe.www_authenticate = handshake.challenge;
                probe.error_message = handshake.error_message;
            }
            Err(e) => tracing::debug!(error = %e, "handshake probe failed"),
        }
        probe
    }
}

struct HandshakeProbe {
    status: u16,
    challenge: Option<String>,
    error_message: Option<String>,
}

fn request_failed(err: reqwest::Error) -> ProbeFailure {
    ProbeFailure::Request(err.to_string())
}

fn cors_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("access-control-"))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Text of the first `<title>` element, whitespace collapsed.
fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;

    let title = html[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// `error.message`, `error` or `message` from a JSON body, else the
/// trimmed text itself.
fn extract_error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let message = match serde_json::from_str::<Value>(body) {
        Ok(json) => json
            .pointer("/error/message")
            .or_else(|| json.get("error"))
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(_) => Some(body.to_string()),
    }?;

    Some(message.chars().take(MAX_ERROR_LEN).collect())
}
