//! mcpfinder Core Library
//!
//! Introspects MCP servers (npm packages spawned over stdio, or remote
//! SSE / streamable HTTP endpoints), normalizes what they offer into a
//! registry manifest, and submits it to the mcpfinder registry.

pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod introspect;
pub mod locator;
pub mod manifest;
pub mod operator;
pub mod registry;
pub mod transport;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{FinderConfig, Invocation, PackageLauncher};

    // Errors
    pub use crate::error::{
        Cancelled, ConnectFailure, FailureCause, IntrospectionFailure, ProbeFailure,
        RegisterError, SubmissionFailure, TransportError, ValidationError,
    };

    // Pipeline stages
    pub use crate::auth::{AuthFallback, AuthProbe, AuthProber, FallbackOutcome, FallbackStage};
    pub use crate::introspect::{CapabilityCategory, CapabilitySnapshot, IntrospectedServer};
    pub use crate::locator::{Locator, LocatorKind};
    pub use crate::manifest::{Manifest, ManifestBuilder, OperatorMetadata};
    pub use crate::registry::{RegistrationResult, RegistryClient};
    pub use crate::transport::{Connector, Session, SessionCredential, TransportConnector};

    // Commands
    pub use crate::commands::{
        InspectCommand, RegisterCommand, RegisterOptions, RegisterOutcome, RegisterReport,
    };
    pub use crate::operator::{Operator, Prompter};
}
