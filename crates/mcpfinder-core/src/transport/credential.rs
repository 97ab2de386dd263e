//! Per-session credential attachment.
//!
//! A credential belongs to one session and is only ever sent to the origin
//! of the locator it was offered for.

use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use url::{Origin, Url};

/// Environment variable a package child receives the credential in.
pub const PACKAGE_CREDENTIAL_ENV: &str = "API_KEY";

/// Credential offered by the operator during auth fallback.
#[derive(Debug)]
pub struct SessionCredential {
    token: SecretString,
}

impl SessionCredential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    pub fn from_secret(token: SecretString) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Bind this credential to the origin of `locator_url`.
    pub fn scoped_to(&self, locator_url: &Url) -> ScopedCredential {
        ScopedCredential {
            origin: locator_url.origin(),
            token: SecretString::from(self.token.expose_secret().to_owned()),
        }
    }
}

/// A bearer credential bound to one origin.
#[derive(Debug)]
pub struct ScopedCredential {
    origin: Origin,
    token: SecretString,
}

impl ScopedCredential {
    /// `Authorization` header for a request to `target`, or `None` when the
    /// target is outside the bound origin.
    pub fn authorization_for(&self, target: &Url) -> Option<HeaderValue> {
        if target.origin() != self.origin {
            tracing::debug!(target = %target, "withholding credential from foreign origin");
            return None;
        }
        let mut value =
            HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret())).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_attached_to_same_origin() {
        let locator = Url::parse("https://example.com/mcp").unwrap();
        let scoped = SessionCredential::bearer("tok-123").scoped_to(&locator);

        let same = Url::parse("https://example.com/messages?sessionId=1").unwrap();
        let header = scoped.authorization_for(&same).unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer tok-123");
        assert!(header.is_sensitive());
    }

    #[test]
    fn test_credential_withheld_from_other_origins() {
        let locator = Url::parse("https://example.com/mcp").unwrap();
        let scoped = SessionCredential::bearer("tok-123").scoped_to(&locator);

        for other in [
            "https://evil.example.net/mcp",
            "http://example.com/mcp",
            "https://example.com:8443/mcp",
            "https://sub.example.com/mcp",
        ] {
            let url = Url::parse(other).unwrap();
            assert!(scoped.authorization_for(&url).is_none(), "{other}");
        }
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let credential = SessionCredential::bearer("super-secret");
        assert!(!format!("{credential:?}").contains("super-secret"));
    }
}
