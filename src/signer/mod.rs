//! Signing backends.
//!
//! The engine only sees [`crate::services::SigningBackend`]; [`LocalSigner`]
//! is the in-process implementation used by the CLI and tests.

pub mod local;

pub use local::{LocalSigner, PRIVATE_KEY_ENV_VAR};
