//! Registry client interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// On-chain status of a registered plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Registration is valid.
    Active,
    /// Registration was revoked.
    Revoked,
    /// Registration lapsed.
    Expired,
}

/// Snapshot of registry state for one plate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    /// Owner identity (address-like).
    pub owner: String,
    /// Registration status.
    pub status: RecordStatus,
    /// Block height the snapshot was read at.
    pub as_of_block: u64,
}

impl RegistryRecord {
    /// Create a record.
    #[must_use]
    pub fn new(owner: impl Into<String>, status: RecordStatus, as_of_block: u64) -> Self {
        Self {
            owner: owner.into(),
            status,
            as_of_block,
        }
    }
}

/// Registry lookup failure.
///
/// The split drives the verifier's retry policy: transient failures are
/// retried with backoff, permanent ones are reported immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Timeout or network failure; worth retrying.
    #[error("transient registry failure: {0}")]
    Transient(String),

    /// The ledger rejected the request; retrying will not help.
    #[error("permanent registry failure: {0}")]
    Permanent(String),
}

impl RegistryError {
    /// Whether the failure may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Read access to the external vehicle registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve a normalized plate.
    ///
    /// Returns `Ok(None)` when the registry has no record for the plate.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Transient`] for failures worth retrying and
    /// [`RegistryError::Permanent`] for those that are not.
    async fn lookup(&self, plate: &str) -> Result<Option<RegistryRecord>, RegistryError>;
}
