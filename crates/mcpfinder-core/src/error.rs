//! Error taxonomy for the registration pipeline.
//!
//! Each stage owns one error type. `RegisterError` is what the top-level
//! command surfaces once a stage cannot recover locally.

use std::time::Duration;

use thiserror::Error;

/// A locator string was rejected by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("locator is empty")]
    Empty,
    #[error("invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },
    #[error("'{0}' is neither an http(s) URL nor a valid package name")]
    InvalidPackageName(String),
}

/// The transport to the candidate server could not be established.
#[derive(Debug, Error)]
pub enum ConnectFailure {
    #[error("failed to create scratch directory: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare HTTP client for {url}: {cause}")]
    Client { url: String, cause: String },
}

/// Errors raised while exchanging JSON-RPC messages with a candidate server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server refused the request (HTTP {status})")]
    Unauthorized {
        status: u16,
        challenge: Option<String>,
        body: String,
    },
    #[error("unexpected HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("could not reach server: {0}")]
    Unreachable(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    /// Whether the server signalled missing or invalid credentials.
    pub fn is_authorization(&self) -> bool {
        match self {
            Self::Unauthorized { .. } => true,
            Self::Http { status, .. } => *status == 401 || *status == 403,
            Self::Rpc { code, message } => {
                let message = message.to_ascii_lowercase();
                *code == 401
                    || *code == 403
                    || message.contains("unauthorized")
                    || message.contains("unauthorised")
                    || message.contains("forbidden")
                    || message.contains("401")
            }
            _ => false,
        }
    }

    /// The `WWW-Authenticate` challenge returned with an authorization failure.
    pub fn challenge(&self) -> Option<&str> {
        match self {
            Self::Unauthorized { challenge, .. } => challenge.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_connect() {
            Self::Unreachable(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Why introspection failed, as far as the fallback path is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Authorization,
    Other,
}

/// The discovery handshake or one of the listing calls failed.
#[derive(Debug, Error)]
#[error("introspection failed during {stage}: {source}")]
pub struct IntrospectionFailure {
    pub stage: &'static str,
    #[source]
    pub source: TransportError,
}

impl IntrospectionFailure {
    pub fn new(stage: &'static str, source: TransportError) -> Self {
        Self { stage, source }
    }

    pub fn cause(&self) -> FailureCause {
        if self.source.is_authorization() {
            FailureCause::Authorization
        } else {
            FailureCause::Other
        }
    }

    pub fn challenge(&self) -> Option<&str> {
        self.source.challenge()
    }
}

/// A best-effort auth probe request failed. Always swallowed.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe request failed: {0}")]
    Request(String),
    #[error("probe response was not usable: {0}")]
    Unusable(String),
}

/// The registry rejected the manifest or answered with something unusable.
#[derive(Debug, Error)]
pub enum SubmissionFailure {
    #[error("registry rejected the submission (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("registry returned a malformed response (HTTP {status}): {detail}")]
    MalformedResponse { status: u16, detail: String },
    #[error("could not reach registry: {0}")]
    Unreachable(String),
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid registry URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("registry secret cannot be used as an HMAC key")]
    Signing,
}

/// The operator declined or a prompt expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled by user")]
pub struct Cancelled;

/// Terminal error of a registration attempt.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connect(#[from] ConnectFailure),
    #[error(transparent)]
    Introspection(#[from] IntrospectionFailure),
    #[error(transparent)]
    Submission(#[from] SubmissionFailure),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl RegisterError {
    /// Cancellation is a clean exit rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
