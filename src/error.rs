//! Error types for plate-verifier.

use crate::registry::RegistryError;
use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the service shell.
///
/// Pipeline failures never show up here: ingestion rejections are returned to
/// the caller of `ingest`, and registry failures are folded into the
/// verification result.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Deployment descriptor could not be used.
    #[error("deployment descriptor error: {0}")]
    Deployment(String),

    /// Registry client construction failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Detector collaborator failed.
    #[error("detector error: {0}")]
    Detector(String),

    /// HTTP/WebSocket server failure.
    #[error("server error: {0}")]
    Server(String),
}
