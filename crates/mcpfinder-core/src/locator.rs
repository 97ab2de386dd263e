//! Locator classification.
//!
//! A locator is either an npm-style package name (spawned over stdio) or an
//! absolute http(s) URL. URLs whose path ends in `/sse` use the legacy SSE
//! transport; every other URL uses streamable HTTP.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use url::Url;

use crate::error::ValidationError;

/// Path suffix that marks a legacy SSE endpoint
pub const LEGACY_SSE_SUFFIX: &str = "/sse";

/// npm caps package names at 214 characters
const MAX_PACKAGE_NAME_LEN: usize = 214;

/// Transport binding selected for a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorKind {
    Package,
    SseEndpoint,
    StreamableEndpoint,
}

impl LocatorKind {
    pub fn is_endpoint(&self) -> bool {
        !matches!(self, Self::Package)
    }
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Package => "package",
            Self::SseEndpoint => "sse-endpoint",
            Self::StreamableEndpoint => "streamable-endpoint",
        };
        f.write_str(label)
    }
}

/// A validated, immutable server locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    kind: LocatorKind,
    url: Option<Url>,
}

impl Locator {
    /// Classify `input`. Total: every string is either accepted or rejected.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(ValidationError::Empty);
        }

        if has_http_scheme(raw) {
            let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl {
                input: raw.to_string(),
                reason: e.to_string(),
            })?;
            let kind = if is_legacy_sse_path(url.path()) {
                LocatorKind::SseEndpoint
            } else {
                LocatorKind::StreamableEndpoint
            };
            return Ok(Self {
                raw: raw.to_string(),
                kind,
                url: Some(url),
            });
        }

        if is_valid_package_name(raw) {
            return Ok(Self {
                raw: raw.to_string(),
                kind: LocatorKind::Package,
                url: None,
            });
        }

        Err(ValidationError::InvalidPackageName(raw.to_string()))
    }

    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    /// The locator as the operator entered it (trimmed). This is the
    /// registry key.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed URL for endpoint locators.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Package name for package locators.
    pub fn package_name(&self) -> Option<&str> {
        match self.kind {
            LocatorKind::Package => Some(&self.raw),
            _ => None,
        }
    }
}

impl FromStr for Locator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn has_http_scheme(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_legacy_sse_path(path: &str) -> bool {
    path.trim_end_matches('/').ends_with(LEGACY_SSE_SUFFIX)
}

/// `[@scope/]name` where both parts are lowercase alphanumerics plus `-._`
/// and do not start with `.` or `_`.
fn is_valid_package_name(name: &str) -> bool {
    if name.len() > MAX_PACKAGE_NAME_LEN {
        return false;
    }

    match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, bare)) => is_valid_segment(scope) && is_valid_segment(bare),
            None => false,
        },
        None => is_valid_segment(name),
    }
}

fn is_valid_segment(segment: &str) -> bool {
    let Some(first) = segment.chars().next() else {
        return false;
    };
    if first == '.' || first == '_' {
        return false;
    }
    segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_'))
}
