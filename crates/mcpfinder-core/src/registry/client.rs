//! HTTP client for the registry API.

use std::fmt;
use std::time::Duration;

use reqwest::header;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::signing;
use crate::config::FinderConfig;
use crate::error::SubmissionFailure;
use crate::locator::Locator;
use crate::manifest::{AuthRequirement, Manifest, TAG_UNANALYZED};

const REGISTER_PATH: &str = "api/v1/register";
const SEARCH_PATH: &str = "api/v1/search";

/// Whether the registry created a new entry or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Created,
    Updated,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationResult {
    pub id: String,
    pub operation: Operation,
    /// Manifest as echoed by the registry
    pub manifest: Value,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub id: String,
    pub url: String,
    pub tags: Vec<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub auth: Option<AuthRequirement>,
}

impl RegistryEntry {
    /// Whether the registry only holds placeholder data for this server.
    pub fn is_unanalyzed(&self) -> bool {
        self.tags.iter().any(|t| t == TAG_UNANALYZED)
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    url: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    auth: Option<Value>,
}

impl From<RawEntry> for RegistryEntry {
    fn from(raw: RawEntry) -> Self {
        Self {
            id: id_string(&raw.id).unwrap_or_default(),
            url: raw.url,
            tags: raw.tags,
            name: raw.name,
            description: raw.description,
            // An auth block we cannot read is treated as absent
            auth: raw.auth.and_then(|auth| serde_json::from_value(auth).ok()),
        }
    }
}

/// Exact body and signature of a submission.
#[derive(Debug, Clone)]
pub struct PreparedSubmission {
    pub body: Vec<u8>,
    /// Hex HMAC, present iff a secret is configured
    pub signature: Option<String>,
}

impl PreparedSubmission {
    pub fn authorization(&self) -> Option<String> {
        self.signature.as_deref().map(signing::authorization_value)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct RegistryClient {
    base: Url,
    secret: Option<SecretString>,
    http: reqwest::Client,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(
        base: Url,
        secret: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, SubmissionFailure> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mcpfinder/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SubmissionFailure::Unreachable(e.to_string()))?;

        Ok(Self {
            base: with_trailing_slash(base),
            secret,
            http,
            timeout,
        })
    }

    pub fn from_config(config: &FinderConfig) -> Result<Self, SubmissionFailure> {
        let secret = config
            .registry_secret
            .as_ref()
            .map(|s| SecretString::from(s.expose_secret().to_owned()));
        Self::new(config.registry_url.clone(), secret, config.request_timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn is_signed(&self) -> bool {
        self.secret.is_some()
    }

    /// Serialize and, when a secret is configured, sign `manifest`.
    pub fn prepare(&self, manifest: &Manifest) -> Result<PreparedSubmission, SubmissionFailure> {
        let body = manifest.to_canonical_json()?;
        let signature = match &self.secret {
            Some(secret) => Some(signing::sign(secret, &body).ok_or(SubmissionFailure::Signing)?),
            None => None,
        };
        Ok(PreparedSubmission { body, signature })
    }

    pub async fn register(&self, manifest: &Manifest) -> Result<RegistrationResult, SubmissionFailure> {
        let prepared = self.prepare(manifest)?;
        self.submit(&prepared).await
    }

    /// POST a prepared submission.
    pub async fn submit(
        &self,
        prepared: &PreparedSubmission,
    ) -> Result<RegistrationResult, SubmissionFailure> {
        let url = self.base.join(REGISTER_PATH)?;
        tracing::info!(url = %url, signed = prepared.signature.is_some(), "submitting manifest");

        let mut request = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(prepared.body.clone());
        if let Some(authorization) = prepared.authorization() {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        let response = request.send().await.map_err(|e| self.unreachable(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.unreachable(&e))?;

        let json: Value = serde_json::from_str(&text).map_err(|e| {
            SubmissionFailure::MalformedResponse {
                status: status.as_u16(),
                detail: format!("response is not JSON ({e}): {}", excerpt(&text)),
            }
        })?;

        if !status.is_success() {
            let message = ["error", "message"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| text.trim().to_string());
            tracing::warn!(status = status.as_u16(), %message, "registry rejected submission");
            return Err(SubmissionFailure::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let id = json.get("id").and_then(id_string).ok_or_else(|| {
            SubmissionFailure::MalformedResponse {
                status: status.as_u16(),
                detail: "response has no id".to_string(),
            }
        })?;
        let operation = match json.get("operation") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
                SubmissionFailure::MalformedResponse {
                    status: status.as_u16(),
                    detail: format!("unknown operation {value}"),
                }
            })?,
            None if status == reqwest::StatusCode::CREATED => Operation::Created,
            None => Operation::Updated,
        };
        let manifest = json.get("manifest").cloned().unwrap_or(Value::Null);

        tracing::info!(%id, %operation, "registration accepted");
        Ok(RegistrationResult {
            id,
            operation,
            manifest,
        })
    }

    /// Query the registry search endpoint.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RegistryEntry>, SubmissionFailure> {
        let mut url = self.base.join(SEARCH_PATH)?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("limit", &limit.to_string());

        tracing::debug!(url = %url, "searching registry");
        let response = self.http.get(url).send().await.map_err(|e| self.unreachable(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.unreachable(&e))?;

        let json: Value =
            serde_json::from_str(&text).map_err(|e| SubmissionFailure::MalformedResponse {
                status: status.as_u16(),
                detail: format!("search response is not JSON ({e}): {}", excerpt(&text)),
            })?;
        if !status.is_success() {
            return Err(SubmissionFailure::Rejected {
                status: status.as_u16(),
                message: json
                    .get("error")
                    .or_else(|| json.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("search failed")
                    .to_string(),
            });
        }

        let items = match json {
            Value::Array(items) => items,
            Value::Object(mut object) => match object
                .remove("servers")
                .or_else(|| object.remove("results"))
            {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RawEntry>(item).ok())
            .map(RegistryEntry::from)
            .collect())
    }

    /// Best-effort lookup of the entry registered under exactly `locator`.
    pub async fn find_existing(&self, locator: &Locator) -> Option<RegistryEntry> {
        match self.search(locator.as_str(), 1).await {
            Ok(entries) => entries.into_iter().find(|e| e.url == locator.as_str()),
            Err(e) => {
                tracing::debug!(locator = %locator, error = %e, "registry lookup failed");
                None
            }
        }
    }

    fn unreachable(&self, err: &reqwest::Error) -> SubmissionFailure {
        if err.is_timeout() {
            SubmissionFailure::Unreachable(format!("timed out after {:?}", self.timeout))
        } else {
            SubmissionFailure::Unreachable(err.to_string())
        }
    }
}

impl fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base", &self.base.as_str())
            .field("signed", &self.is_signed())
            .finish_non_exhaustive()
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn excerpt(text: &str) -> String {
    const MAX: usize = 200;
    let text = text.trim();
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}
