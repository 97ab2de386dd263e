//! Transport sessions to candidate MCP servers.
//!
//! A [`Session`] owns exactly one connection attempt: the transport, and for
//! package locators the child process and its scratch working directory.
//! Sessions are released by [`Session::close`]; dropping a session without
//! closing it still kills the child and removes the directory.

pub mod credential;
pub mod jsonrpc;
pub mod legacy_sse;
pub mod sse;
pub mod stdio;
pub mod streamable;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use crate::config::{FinderConfig, PackageLauncher};
use crate::error::{ConnectFailure, TransportError};
use crate::locator::{Locator, LocatorKind};

pub use credential::{PACKAGE_CREDENTIAL_ENV, ScopedCredential, SessionCredential};
pub use legacy_sse::LegacySseTransport;
pub use stdio::StdioTransport;
pub use streamable::StreamableHttpTransport;

/// Request/response exchange with one MCP server.
#[async_trait]
pub trait McpTransport: Send {
    /// Send a request and wait for its response.
    async fn request(&mut self, method: &str, params: Option<Value>)
    -> Result<Value, TransportError>;

    /// Send a notification; no response is expected.
    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), TransportError>;

    /// Tear the connection down.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// One live connection attempt.
pub struct Session {
    locator: Locator,
    transport: Box<dyn McpTransport>,
    scratch: Option<TempDir>,
}

impl Session {
    pub fn new(locator: Locator, transport: Box<dyn McpTransport>) -> Self {
        Self {
            locator,
            transport,
            scratch: None,
        }
    }

    /// Attach the scratch directory the session's child runs in.
    pub fn with_scratch_dir(mut self, dir: TempDir) -> Self {
        self.scratch = Some(dir);
        self
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        self.transport.request(method, params).await
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.transport.notify(method, params).await
    }

    /// Close the transport, then remove the scratch directory.
    ///
    /// Teardown problems are logged rather than returned; the session is gone
    /// either way.
    pub async fn close(mut self) {
        if let Err(e) = self.transport.close().await {
            tracing::warn!(locator = %self.locator, error = %e, "error while closing transport");
        }

        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
            } else {
                tracing::debug!(path = %path.display(), "removed scratch directory");
            }
        }

        tracing::info!(locator = %self.locator, "session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("locator", &self.locator)
            .field("scratch", &self.scratch_dir())
            .finish_non_exhaustive()
    }
}

/// Opens sessions for locators.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        locator: &Locator,
        credential: Option<&SessionCredential>,
    ) -> Result<Session, ConnectFailure>;
}

/// Connector backed by the real stdio, SSE and streamable HTTP transports.
#[derive(Debug, Clone)]
pub struct TransportConnector {
    launcher: PackageLauncher,
    request_timeout: Duration,
}

impl TransportConnector {
    pub fn new(launcher: PackageLauncher, request_timeout: Duration) -> Self {
        Self {
            launcher,
            request_timeout,
        }
    }

    pub fn from_config(config: &FinderConfig) -> Self {
        Self::new(config.launcher.clone(), config.request_timeout)
    }

    fn connect_package(
        &self,
        locator: &Locator,
        package: &str,
        credential: Option<&SessionCredential>,
    ) -> Result<Session, ConnectFailure> {
        let scratch = tempfile::Builder::new()
            .prefix("mcpfinder-")
            .tempdir()
            .map_err(ConnectFailure::Workspace)?;

        let invocation = self.launcher.invocation(package);
        let transport = StdioTransport::spawn(
            &invocation,
            scratch.path(),
            credential,
            self.request_timeout,
        )?;

        Ok(Session::new(locator.clone(), Box::new(transport)).with_scratch_dir(scratch))
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(
        &self,
        locator: &Locator,
        credential: Option<&SessionCredential>,
    ) -> Result<Session, ConnectFailure> {
        tracing::info!(locator = %locator, kind = %locator.kind(), "opening session");

        match (locator.kind(), locator.package_name(), locator.url()) {
            (LocatorKind::Package, Some(package), _) => {
                self.connect_package(locator, package, credential)
            }
            (LocatorKind::SseEndpoint, _, Some(url)) => {
                let scoped = credential.map(|c| c.scoped_to(url));
                let transport = LegacySseTransport::new(url.clone(), scoped, self.request_timeout)?;
                Ok(Session::new(locator.clone(), Box::new(transport)))
            }
            (LocatorKind::StreamableEndpoint, _, Some(url)) => {
                let scoped = credential.map(|c| c.scoped_to(url));
                let transport =
                    StreamableHttpTransport::new(url.clone(), scoped, self.request_timeout)?;
                Ok(Session::new(locator.clone(), Box::new(transport)))
            }
            _ => Err(ConnectFailure::Client {
                url: locator.to_string(),
                cause: "locator has no usable target".to_string(),
            }),
        }
    }
}

/// Shared HTTP client construction for the network transports.
pub(crate) fn http_client(
    url: &url::Url,
    timeout: Duration,
) -> Result<reqwest::Client, ConnectFailure> {
    reqwest::Client::builder()
        .user_agent(concat!("mcpfinder/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(timeout)
        .build()
        .map_err(|e| ConnectFailure::Client {
            url: url.to_string(),
            cause: e.to_string(),
        })
}

/// Map a non-success HTTP status onto the transport error taxonomy.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let challenge = response
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(TransportError::Unauthorized {
            status: status.as_u16(),
            challenge,
            body,
        });
    }
    Err(TransportError::Http {
        status: status.as_u16(),
        body,
    })
}
