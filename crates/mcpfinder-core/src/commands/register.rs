//! Register command implementation.
//!
//! Drives one registration attempt end to end: locator intake, introspection,
//! the auth fallback when introspection is refused, registry policy checks,
//! operator metadata, manifest build, and signed submission.

use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::auth::{
    AuthFallback, AuthProbe, AuthProber, FallbackOutcome, FallbackStage, HttpProber,
};
use crate::config::{FinderConfig, PackageLauncher};
use crate::error::{FailureCause, RegisterError};
use crate::introspect::{self, CapabilitySnapshot};
use crate::locator::Locator;
use crate::manifest::{
    AuthDetails, AuthType, DEFAULT_KEY_NAME, Manifest, ManifestBuilder, OperatorMetadata,
};
use crate::operator::{Operator, Prompter};
use crate::registry::{PreparedSubmission, RegistrationResult, RegistryClient, RegistryEntry};
use crate::transport::{Connector, TransportConnector};

/// Options for the register command
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Locator to start with; prompted for when absent or invalid
    pub locator: Option<String>,
    /// Description; prompted for when absent
    pub description: Option<String>,
    /// Tags; prompted for when empty
    pub tags: Vec<String>,
    /// Submit without the final confirmation
    pub assume_yes: bool,
    /// Build and sign the manifest but do not submit it
    pub dry_run: bool,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_assume_yes(mut self, assume_yes: bool) -> Self {
        self.assume_yes = assume_yes;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Report from a successful submission
#[derive(Debug, Clone, Serialize)]
pub struct RegisterReport {
    pub result: RegistrationResult,
    pub manifest: Manifest,
    /// Terminal fallback stage, when introspection was refused
    pub fallback: Option<FallbackStage>,
    /// Whether only capabilities were updated on an existing entry
    pub capability_only: bool,
    pub warnings: Vec<String>,
}

/// How a registration attempt ended without error.
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    Submitted(RegisterReport),
    /// `dry_run` was set; nothing was sent.
    DryRun {
        manifest: Manifest,
        prepared: PreparedSubmission,
    },
    /// The operator declined to submit.
    Declined,
}

/// Result of analyzing one locator.
enum Analysis {
    Introspected(introspect::IntrospectedServer),
    Fallback(FallbackOutcome),
}

impl Analysis {
    fn snapshot(&self) -> CapabilitySnapshot {
        match self {
            Self::Introspected(server) => CapabilitySnapshot::Full(server.clone()),
            Self::Fallback(outcome) => outcome.snapshot.clone(),
        }
    }

    fn probe(&self) -> Option<&AuthProbe> {
        match self {
            Self::Introspected(_) => None,
            Self::Fallback(outcome) => Some(&outcome.probe),
        }
    }

    fn fallback_stage(&self) -> Option<FallbackStage> {
        match self {
            Self::Introspected(_) => None,
            Self::Fallback(outcome) => Some(outcome.stage),
        }
    }
}

/// Register command orchestrator
pub struct RegisterCommand {
    connector: Box<dyn Connector>,
    prober: Box<dyn AuthProber>,
    registry: RegistryClient,
    launcher: PackageLauncher,
    prompt_timeout: Duration,
}

impl RegisterCommand {
    pub fn new(
        connector: Box<dyn Connector>,
        prober: Box<dyn AuthProber>,
        registry: RegistryClient,
        launcher: PackageLauncher,
        prompt_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            prober,
            registry,
            launcher,
            prompt_timeout,
        }
    }

    /// Create a register command wired to the real transports and registry
    pub fn from_config(config: &FinderConfig) -> anyhow::Result<Self> {
        let prober =
            HttpProber::new(config.probe_timeout).context("Failed to create probe client")?;
        let registry =
            RegistryClient::from_config(config).context("Failed to create registry client")?;
        Ok(Self::new(
            Box::new(TransportConnector::from_config(config)),
            Box::new(prober),
            registry,
            config.launcher.clone(),
            config.prompt_timeout,
        ))
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Execute the register command
    pub async fn execute(
        &self,
        options: &RegisterOptions,
        operator: &mut dyn Operator,
    ) -> Result<RegisterOutcome, RegisterError> {
        let mut prompter = Prompter::new(operator, self.prompt_timeout);
        let mut warnings = Vec::new();

        let (locator, analysis) = self.locate_and_analyze(options, &mut prompter).await?;
        let snapshot = analysis.snapshot();

        if !self.registry.is_signed() {
            prompter.notice("No registry secret configured; the submission will be unsigned.");
        }

        let existing = if self.registry.is_signed() {
            None
        } else {
            self.registry.find_existing(&locator).await
        };
        let capability_only = existing.as_ref().is_some_and(|e| !e.is_unanalyzed());

        if capability_only {
            prompter.notice(&format!(
                "{locator} is already registered with analyzed data; only its capabilities will be updated."
            ));
            if !snapshot.is_full() {
                warnings.push(format!(
                    "Replacing analyzed capabilities of {locator} with {} data",
                    snapshot.state()
                ));
                let replace = prompter
                    .confirm(
                        "The new capability data is less complete than the registered data. Replace it anyway?",
                        false,
                    )
                    .await?;
                if !replace {
                    return Ok(RegisterOutcome::Declined);
                }
            }
        }

        let metadata = match existing.as_ref().filter(|_| capability_only) {
            Some(entry) => metadata_from_entry(entry),
            None => self.collect_metadata(options, &analysis, &mut prompter).await?,
        };

        let manifest = ManifestBuilder::new(&locator, &self.launcher)
            .with_probe(analysis.probe())
            .build(&snapshot, &metadata);
        let prepared = self.registry.prepare(&manifest)?;

        if options.dry_run {
            tracing::info!(locator = %locator, "dry run; manifest not submitted");
            return Ok(RegisterOutcome::DryRun { manifest, prepared });
        }

        prompter.notice(&format!(
            "Ready to register '{}' ({}) with {} capabilities [{}]",
            manifest.name,
            manifest.url,
            manifest.capabilities.len(),
            manifest.tags.join(", ")
        ));
        if !options.assume_yes && !prompter.confirm("Submit to the registry?", true).await? {
            return Ok(RegisterOutcome::Declined);
        }

        let result = self.registry.submit(&prepared).await?;
        Ok(RegisterOutcome::Submitted(RegisterReport {
            result,
            manifest,
            fallback: analysis.fallback_stage(),
            capability_only,
            warnings,
        }))
    }

    /// Loop until a locator is accepted and analyzed, re-prompting on
    /// validation errors and offering another locator on other failures.
    async fn locate_and_analyze(
        &self,
        options: &RegisterOptions,
        prompter: &mut Prompter<'_>,
    ) -> Result<(Locator, Analysis), RegisterError> {
        let mut candidate = options.locator.clone();

        loop {
            let raw = match candidate.take() {
                Some(raw) => raw,
                None => {
                    prompter
                        .input("Server locator (npm package or http(s) URL)", None)
                        .await?
                }
            };

            let locator = match Locator::parse(&raw) {
                Ok(locator) => locator,
                Err(e) => {
                    prompter.notice(&format!("Invalid locator: {e}"));
                    continue;
                }
            };

            match self.analyze(&locator, prompter).await {
                Ok(analysis) => return Ok((locator, analysis)),
                Err(e @ (RegisterError::Connect(_) | RegisterError::Introspection(_))) => {
                    tracing::warn!(locator = %locator, error = %e, "analysis failed");
                    prompter.notice(&format!("Could not analyze {locator}: {e}"));
                    if !prompter.confirm("Try another locator?", true).await? {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Open a session, introspect, close it. On an authorization failure the
    /// auth fallback takes over with sessions of its own.
    async fn analyze(
        &self,
        locator: &Locator,
        prompter: &mut Prompter<'_>,
    ) -> Result<Analysis, RegisterError> {
        let mut session = self.connector.connect(locator, None).await?;
        let result = introspect::introspect(&mut session).await;
        session.close().await;

        match result {
            Ok(server) => Ok(Analysis::Introspected(server)),
            Err(failure) if failure.cause() == FailureCause::Authorization => {
                tracing::info!(locator = %locator, "introspection refused; entering auth fallback");
                let fallback = AuthFallback::new(&*self.connector, &*self.prober);
                let outcome = fallback.run(locator, &failure, prompter).await?;
                Ok(Analysis::Fallback(outcome))
            }
            Err(failure) => Err(failure.into()),
        }
    }

    async fn collect_metadata(
        &self,
        options: &RegisterOptions,
        analysis: &Analysis,
        prompter: &mut Prompter<'_>,
    ) -> Result<OperatorMetadata, RegisterError> {
        let description = match &options.description {
            Some(description) => description.clone(),
            None => prompter.input("Description", None).await?,
        };

        let tags = if options.tags.is_empty() {
            prompter
                .input("Tags (comma separated)", Some(""))
                .await?
                .split(',')
                .map(str::to_string)
                .collect()
        } else {
            options.tags.clone()
        };

        let mut metadata = OperatorMetadata::default()
            .with_description(description)
            .with_tags(tags);

        let refused = analysis.fallback_stage().is_some();
        if prompter
            .confirm("Does this server require a credential (API key or token)?", refused)
            .await?
        {
            metadata = metadata.with_auth(self.collect_auth(analysis.probe(), prompter).await?);
        }

        Ok(metadata)
    }

    async fn collect_auth(
        &self,
        probe: Option<&AuthProbe>,
        prompter: &mut Prompter<'_>,
    ) -> Result<AuthDetails, RegisterError> {
        let auth_type = match probe.and_then(AuthProbe::inferred_auth_type) {
            Some(inferred) => {
                prompter.notice(&format!("Detected authentication type: {inferred}"));
                None
            }
            None => {
                let labels: Vec<String> = AuthType::ALL.iter().map(|t| t.to_string()).collect();
                let index = prompter.select("Authentication type", &labels, 0).await?;
                AuthType::ALL.get(index).copied()
            }
        };

        let key_name = prompter
            .input("Credential variable name", Some(DEFAULT_KEY_NAME))
            .await?;
        let instructions = prompter
            .input("Setup instructions (optional)", Some(""))
            .await?;

        Ok(AuthDetails {
            auth_type,
            key_name: Some(key_name),
            instructions: Some(instructions),
        })
    }
}

/// Metadata for a capability-only update keeps what the registry holds.
fn metadata_from_entry(entry: &RegistryEntry) -> OperatorMetadata {
    let mut metadata = OperatorMetadata::default().with_tags(entry.tags.iter().cloned());
    metadata.description = entry.description.clone();
    metadata.auth = entry.auth.as_ref().map(|auth| AuthDetails {
        auth_type: Some(auth.auth_type),
        key_name: auth.key_name.clone(),
        instructions: auth.instructions.clone(),
    });
    metadata
}
