//! High-level commands for mcpfinder operations.
//!
//! These are the entry points frontends call; each owns its collaborators
//! and releases every session it opens before returning.

pub mod inspect;
pub mod register;

pub use inspect::{InspectCommand, InspectReport};
pub use register::{RegisterCommand, RegisterOptions, RegisterOutcome, RegisterReport};
