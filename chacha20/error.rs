//! Error types for cipher construction and backend configuration.

use crate::backend::Backend;
use thiserror::Error;

/// Result type for fallible cipher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fallible cipher operations.
///
/// Only construction and configuration can fail. Once a [`crate::Cipher`]
/// exists, applying the keystream is total.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("Backend not supported by this CPU: {0}")]
    BackendUnavailable(Backend),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),
}
