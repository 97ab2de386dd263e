//! Staged degradation after an authorization failure.

use std::fmt;

use secrecy::ExposeSecret;
use serde::Serialize;

use super::probe::{AuthProbe, AuthProber};
use crate::error::{Cancelled, IntrospectionFailure};
use crate::introspect::{self, CapabilityCategory, CapabilitySnapshot, IntrospectedServer};
use crate::locator::Locator;
use crate::operator::Prompter;
use crate::transport::{Connector, SessionCredential};

/// States of the fallback machine, in the order they can be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStage {
    Probing,
    TokenOffered,
    NoToken,
    RetriedSuccess,
    RetriedFail,
    ManualDeclared,
    MinimalUnknown,
}

impl FallbackStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RetriedSuccess | Self::ManualDeclared | Self::MinimalUnknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Probing => "probing",
            Self::TokenOffered => "token-offered",
            Self::NoToken => "no-token",
            Self::RetriedSuccess => "retried-success",
            Self::RetriedFail => "retried-fail",
            Self::ManualDeclared => "manual-declared",
            Self::MinimalUnknown => "minimal-unknown",
        }
    }
}

impl fmt::Display for FallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the fallback ended up.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    /// Terminal stage
    pub stage: FallbackStage,
    /// Every stage visited, ending with `stage`
    pub trail: Vec<FallbackStage>,
    pub snapshot: CapabilitySnapshot,
    pub probe: AuthProbe,
}

impl FallbackOutcome {
    /// Whether the operator supplied a credential at some point.
    pub fn credential_offered(&self) -> bool {
        self.trail.contains(&FallbackStage::TokenOffered)
    }
}

enum Pending {
    Probing,
    TokenOffered(SessionCredential),
    Degrade,
}

/// Drives the fallback for one locator.
pub struct AuthFallback<'a> {
    connector: &'a dyn Connector,
    prober: &'a dyn AuthProber,
}

impl<'a> AuthFallback<'a> {
    pub fn new(connector: &'a dyn Connector, prober: &'a dyn AuthProber) -> Self {
        Self { connector, prober }
    }

    /// Run the machine to a terminal stage.
    ///
    /// Never fails: the only early exit is operator cancellation.
    pub async fn run(
        &self,
        locator: &Locator,
        failure: &IntrospectionFailure,
        prompter: &mut Prompter<'_>,
    ) -> Result<FallbackOutcome, Cancelled> {
        let mut trail = Vec::new();
        let mut probe = AuthProbe::default();
        let mut pending = Pending::Probing;

        loop {
            pending = match pending {
                Pending::Probing => {
                    trail.push(FallbackStage::Probing);
                    probe = self.prober.probe(locator).await;
                    probe.merge_challenge(failure.challenge());

                    prompter.notice(&format!("{locator} requires authorization ({failure})"));
                    for line in probe.summary_lines() {
                        prompter.notice(&format!("  {line}"));
                    }

                    if prompter
                        .confirm("Do you have a credential (API key or token) for this server?", false)
                        .await?
                    {
                        let token = prompter.secret("Credential").await?;
                        if token.expose_secret().trim().is_empty() {
                            trail.push(FallbackStage::NoToken);
                            Pending::Degrade
                        } else {
                            Pending::TokenOffered(SessionCredential::from_secret(token))
                        }
                    } else {
                        trail.push(FallbackStage::NoToken);
                        Pending::Degrade
                    }
                }
                Pending::TokenOffered(credential) => {
                    trail.push(FallbackStage::TokenOffered);
                    match self.retry(locator, &credential).await {
                        Some(server) => {
                            trail.push(FallbackStage::RetriedSuccess);
                            return Ok(self.finish(trail, CapabilitySnapshot::Full(server), probe));
                        }
                        None => {
                            prompter.notice("Introspection still failed with the credential.");
                            trail.push(FallbackStage::RetriedFail);
                            Pending::Degrade
                        }
                    }
                }
                Pending::Degrade => {
                    let snapshot = self.degrade(prompter).await?;
                    trail.push(match snapshot {
                        CapabilitySnapshot::Placeholder { .. } => FallbackStage::ManualDeclared,
                        _ => FallbackStage::MinimalUnknown,
                    });
                    return Ok(self.finish(trail, snapshot, probe));
                }
            };
        }
    }

    /// One introspection attempt with `credential` attached.
    async fn retry(
        &self,
        locator: &Locator,
        credential: &SessionCredential,
    ) -> Option<IntrospectedServer> {
        let mut session = match self.connector.connect(locator, Some(credential)).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(locator = %locator, error = %e, "retry connection failed");
                return None;
            }
        };

        let result = introspect::introspect(&mut session).await;
        session.close().await;

        match result {
            Ok(server) => Some(server),
            Err(e) => {
                tracing::warn!(locator = %locator, error = %e, "introspection with credential failed");
                None
            }
        }
    }

    async fn degrade(&self, prompter: &mut Prompter<'_>) -> Result<CapabilitySnapshot, Cancelled> {
        if !prompter
            .confirm("Declare the server's capability categories manually?", false)
            .await?
        {
            return Ok(CapabilitySnapshot::Unknown);
        }

        let labels: Vec<String> = CapabilityCategory::ALL
            .iter()
            .map(|c| c.plural().to_string())
            .collect();
        let picked = prompter
            .select_many("Which capability categories does it offer?", &labels)
            .await?;

        let categories: Vec<_> = picked
            .into_iter()
            .filter_map(|i| CapabilityCategory::ALL.get(i).copied())
            .collect();
        if categories.is_empty() {
            return Ok(CapabilitySnapshot::Unknown);
        }
        Ok(CapabilitySnapshot::placeholder(categories))
    }

    fn finish(
        &self,
        trail: Vec<FallbackStage>,
        snapshot: CapabilitySnapshot,
        probe: AuthProbe,
    ) -> FallbackOutcome {
        let stage = trail.last().copied().unwrap_or(FallbackStage::MinimalUnknown);
        tracing::info!(stage = %stage, snapshot = snapshot.state(), "auth fallback finished");
        FallbackOutcome {
            stage,
            trail,
            snapshot,
            probe,
        }
    }
}
