//! Authorization failure handling.
//!
//! Entered only when introspection was refused for lack of credentials.
//! A probe gathers what the server reveals without credentials, then the
//! operator either supplies a credential for one retry or the registration
//! degrades to a placeholder or unknown capability snapshot.

mod fallback;
mod probe;

pub use fallback::{AuthFallback, FallbackOutcome, FallbackStage};
pub use probe::{AuthProbe, AuthProber, HttpProber};
