//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then the optional TOML file
//! (`~/.config/mcpfinder/config.toml`), then environment variables.
//! Frontends apply their own flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

/// Production registry used when nothing else is configured.
pub const DEFAULT_REGISTRY_URL: &str = "https://mcpfinder.dev";

/// Overrides the registry base URL.
pub const REGISTRY_URL_ENV: &str = "MCPFINDER_API_URL";

/// HMAC key for signed submissions.
pub const REGISTRY_SECRET_ENV: &str = "MCP_REGISTRY_SECRET";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// How a package locator is turned into a child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLauncher {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for PackageLauncher {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            args: vec!["-y".to_string()],
        }
    }
}

impl PackageLauncher {
    /// The exact command line used to start `package`.
    pub fn invocation(&self, package: &str) -> Invocation {
        let mut args = self.args.clone();
        args.push(package.to_string());
        Invocation {
            command: self.command.clone(),
            args,
        }
    }
}

/// A concrete command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
}

/// On-disk configuration file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    registry_url: Option<String>,
    request_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    prompt_timeout_secs: Option<u64>,
    launcher: Option<PackageLauncher>,
}

/// Fully resolved configuration.
#[derive(Debug)]
pub struct FinderConfig {
    pub registry_url: Url,
    pub registry_secret: Option<SecretString>,
    /// Per network call (handshake, listing, submission)
    pub request_timeout: Duration,
    /// Per auth probe sub-request
    pub probe_timeout: Duration,
    /// Per operator prompt
    pub prompt_timeout: Duration,
    pub launcher: PackageLauncher,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            registry_secret: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            launcher: PackageLauncher::default(),
        }
    }
}

fn default_registry_url() -> Url {
    match Url::parse(DEFAULT_REGISTRY_URL) {
        Ok(url) => url,
        Err(_) => unreachable!("DEFAULT_REGISTRY_URL is a valid URL"),
    }
}

impl FinderConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mcpfinder").join("config.toml"))
    }

    /// Load configuration from `path` (or the default location) and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: ConfigFile = toml::from_str(content).context("Failed to parse TOML")?;
        let mut config = Self::default();

        if let Some(url) = file.registry_url {
            config.registry_url = parse_registry_url(&url)?;
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.probe_timeout_secs {
            config.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.prompt_timeout_secs {
            config.prompt_timeout = Duration::from_secs(secs);
        }
        if let Some(launcher) = file.launcher {
            if launcher.command.trim().is_empty() {
                anyhow::bail!("launcher.command must not be empty");
            }
            config.launcher = launcher;
        }

        Ok(config)
    }

    /// Apply `MCPFINDER_API_URL` and `MCP_REGISTRY_SECRET` via `lookup`.
    ///
    /// Blank values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_blank(REGISTRY_URL_ENV) {
            self.registry_url = parse_registry_url(&url)
                .with_context(|| format!("Invalid {}", REGISTRY_URL_ENV))?;
        }
        if let Some(secret) = non_blank(REGISTRY_SECRET_ENV) {
            self.registry_secret = Some(SecretString::from(secret));
        }
        Ok(())
    }

    pub fn with_registry_url(mut self, url: Url) -> Self {
        self.registry_url = url;
        self
    }

    pub fn with_registry_secret(mut self, secret: impl Into<String>) -> Self {
        self.registry_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    pub fn with_launcher(mut self, launcher: PackageLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Whether submissions will carry an HMAC signature.
    pub fn is_signed(&self) -> bool {
        self.registry_secret.is_some()
    }
}

/// Parse a registry base URL, rejecting anything that is not http(s).
pub fn parse_registry_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid registry URL: {}", raw))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => anyhow::bail!("Registry URL must use http or https, got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = FinderConfig::default();
        assert_eq!(config.registry_url.as_str(), "https://mcpfinder.dev/");
        assert!(!config.is_signed());
        assert_eq!(config.launcher.command, "npx");
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_launcher_invocation_appends_package() {
        let launcher = PackageLauncher::default();
        let invocation = launcher.invocation("@acme/weather-mcp");
        assert_eq!(invocation.command, "npx");
        assert_eq!(
            invocation.args,
            vec!["-y".to_string(), "@acme/weather-mcp".to_string()]
        );
    }

    #[test]
    fn test_from_toml_overrides_defaults() {
        let config = FinderConfig::from_toml_str(
            r#"
registry_url = "https://registry.example.com"
probe_timeout_secs = 2

[launcher]
command = "bunx"
args = []
"#,
        )
        .unwrap();

        assert_eq!(config.registry_url.host_str(), Some("registry.example.com"));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.launcher.command, "bunx");
        assert!(config.launcher.args.is_empty());
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(FinderConfig::from_toml_str("registry = \"x\"").is_err());
    }

    #[test]
    fn test_from_toml_rejects_non_http_registry() {
        assert!(FinderConfig::from_toml_str("registry_url = \"ftp://example.com\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (REGISTRY_URL_ENV, "http://localhost:8787"),
            (REGISTRY_SECRET_ENV, "s3cret"),
        ]
        .into_iter()
        .collect();

        let mut config = FinderConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.registry_url.as_str(), "http://localhost:8787/");
        assert!(config.is_signed());
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let mut config = FinderConfig::default();
        config
            .apply_env(|key| (key == REGISTRY_SECRET_ENV).then(|| "  ".to_string()))
            .unwrap();
        assert!(!config.is_signed());
    }
}
