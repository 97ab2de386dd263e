//! Snapshot + operator metadata -> manifest.

use std::collections::BTreeMap;

use url::Host;

use super::{
    AuthDetails, AuthRequirement, AuthType, Capability, DEFAULT_KEY_NAME, Installation, Manifest,
    OperatorMetadata, PROTOCOL_VERSION, TAG_AUTH_REQUIRED, TAG_UNANALYZED,
};
use crate::auth::AuthProbe;
use crate::config::PackageLauncher;
use crate::introspect::{CapabilityCategory, CapabilitySnapshot, IntrospectedServer};
use crate::locator::Locator;

const UNKNOWN_CAPABILITY: &str = "unknown_capabilities";
const UNKNOWN_DESCRIPTION: &str =
    "Capabilities could not be analyzed: server requires authentication";

/// Host labels dropped from the front when deriving a name.
const HOST_PREFIXES: [&str; 3] = ["www.", "mcp.", "api."];

/// Two-label public suffixes dropped whole when deriving a name. Anything
/// else loses only its final label.
const MULTI_LABEL_SUFFIXES: [&str; 16] = [
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "com.au", "net.au", "org.au", "co.nz",
    "co.jp", "co.za", "co.in", "com.br", "com.cn", "com.mx", "com.tr",
];

/// Builds manifests for one locator. Building is a pure function of the
/// inputs: identical inputs give byte-identical canonical JSON.
#[derive(Debug, Clone)]
pub struct ManifestBuilder<'a> {
    locator: &'a Locator,
    launcher: &'a PackageLauncher,
    probe: Option<&'a AuthProbe>,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(locator: &'a Locator, launcher: &'a PackageLauncher) -> Self {
        Self {
            locator,
            launcher,
            probe: None,
        }
    }

    pub fn with_probe(mut self, probe: Option<&'a AuthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn build(
        &self,
        snapshot: &CapabilitySnapshot,
        metadata: &OperatorMetadata,
    ) -> Manifest {
        let name = snapshot
            .server()
            .and_then(|s| s.server_name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| derive_name(self.locator));

        let description = metadata
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{name} MCP server"));

        let mut tags = metadata.tags.clone();
        match snapshot {
            CapabilitySnapshot::Unknown => {
                tags.push(TAG_UNANALYZED.to_string());
                tags.push(TAG_AUTH_REQUIRED.to_string());
            }
            CapabilitySnapshot::Placeholder { .. } => {
                tags.push(TAG_AUTH_REQUIRED.to_string());
            }
            CapabilitySnapshot::Full(_) => {}
        }

        Manifest {
            name,
            description,
            url: self.locator.as_str().to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: capabilities(snapshot),
            tags: normalize_tags(tags),
            installation: self.installation(),
            auth: metadata.auth.as_ref().map(|details| self.auth(details)),
        }
    }

    fn installation(&self) -> Option<Installation> {
        let package = self.locator.package_name()?;
        let invocation = self.launcher.invocation(package);
        Some(Installation {
            command: invocation.command,
            args: invocation.args,
            env: BTreeMap::new(),
        })
    }

    fn auth(&self, details: &AuthDetails) -> AuthRequirement {
        let auth_type = details
            .auth_type
            .or_else(|| self.probe.and_then(AuthProbe::inferred_auth_type))
            .unwrap_or(AuthType::ApiKey);

        let key_name = details
            .key_name
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or(DEFAULT_KEY_NAME)
            .to_string();

        AuthRequirement {
            auth_type,
            instructions: details
                .instructions
                .as_deref()
                .map(str::trim)
                .filter(|i| !i.is_empty())
                .map(str::to_string),
            key_name: Some(key_name),
        }
    }
}

fn capabilities(snapshot: &CapabilitySnapshot) -> Vec<Capability> {
    match snapshot {
        CapabilitySnapshot::Full(server) => full_capabilities(server),
        CapabilitySnapshot::Placeholder { categories } => categories
            .iter()
            .map(|category| Capability {
                name: format!("{}_available", category.plural()),
                kind: *category,
                description: Some(format!(
                    "Server provides {} (details require authentication)",
                    category.plural()
                )),
            })
            .collect(),
        CapabilitySnapshot::Unknown => vec![Capability {
            name: UNKNOWN_CAPABILITY.to_string(),
            kind: CapabilityCategory::Tool,
            description: Some(UNKNOWN_DESCRIPTION.to_string()),
        }],
    }
}

fn full_capabilities(server: &IntrospectedServer) -> Vec<Capability> {
    let tools = server.tools.iter().map(|t| Capability {
        name: t.name.clone(),
        kind: CapabilityCategory::Tool,
        description: t.description.clone(),
    });
    let resources = server.resources.iter().map(|r| Capability {
        name: r.name.clone(),
        kind: CapabilityCategory::Resource,
        description: r.description.clone(),
    });
    let prompts = server.prompts.iter().map(|p| Capability {
        name: p.name.clone(),
        kind: CapabilityCategory::Prompt,
        description: p.description.clone(),
    });
    tools.chain(resources).chain(prompts).collect()
}

/// Trim, lower-case and deduplicate, keeping first occurrences in order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Fallback server name when introspection did not provide one.
///
/// Packages use their unscoped name. URLs use the host with a leading
/// `www.`/`mcp.`/`api.` and the final TLD label removed, joined by `-`.
pub fn derive_name(locator: &Locator) -> String {
    if let Some(package) = locator.package_name() {
        return package
            .rsplit_once('/')
            .map(|(_, bare)| bare)
            .unwrap_or(package)
            .to_string();
    }

    let Some(host) = locator.url().and_then(|u| u.host()) else {
        return locator.as_str().to_string();
    };

    match host {
        Host::Domain(domain) => {
            let mut domain = domain.trim_end_matches('.').to_ascii_lowercase();
            while let Some(rest) = HOST_PREFIXES
                .iter()
                .find_map(|prefix| domain.strip_prefix(*prefix))
                .filter(|rest| !rest.is_empty())
            {
                domain = rest.to_string();
            }

            let mut labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
            let suffix_len = if labels.len() > 2
                && MULTI_LABEL_SUFFIXES
                    .iter()
                    .any(|suffix| domain.ends_with(&format!(".{suffix}")))
            {
                2
            } else {
                1
            };
            if labels.len() > suffix_len {
                labels.truncate(labels.len() - suffix_len);
            }
            labels.join("-")
        }
        Host::Ipv4(addr) => addr.to_string().replace('.', "-"),
        Host::Ipv6(addr) => addr.to_string().replace(':', "-"),
    }
}
