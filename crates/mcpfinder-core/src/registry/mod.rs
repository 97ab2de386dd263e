//! Registry submission.
//!
//! Manifests are POSTed as canonical JSON to `{base}/api/v1/register`.
//! With a shared secret configured, the body is signed with HMAC-SHA256 and
//! sent as `Authorization: HMAC <hex>`.

mod client;
mod signing;

pub use client::{
    Operation, PreparedSubmission, RegistrationResult, RegistryClient, RegistryEntry,
};
pub use signing::{SIGNATURE_SCHEME, authorization_value, sign};
