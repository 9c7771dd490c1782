//! Registry contract deployment descriptor.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Where the registry contract lives, as written by the deploy tooling.
///
/// Read once at startup; never written by this service.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentDescriptor {
    /// Contract address (`0x`-prefixed, 20 bytes).
    pub address: String,
    /// Contract ABI fragments.
    pub abi: Vec<serde_json::Value>,
}

impl DeploymentDescriptor {
    /// Load and validate a descriptor file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or the
    /// address is malformed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Deployment(format!("cannot read {}: {e}", path.display()))
        })?;
        let descriptor = Self::from_json(&content)?;
        info!(
            "Loaded registry deployment {} ({} ABI fragments) from {}",
            descriptor.address,
            descriptor.abi.len(),
            path.display()
        );
        Ok(descriptor)
    }

    /// Parse and validate descriptor JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or the address is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        let descriptor: Self =
            serde_json::from_str(json).map_err(|e| Error::Deployment(e.to_string()))?;
        descriptor.address_bytes()?;
        Ok(descriptor)
    }

    /// Decoded contract address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not 20 hex-encoded bytes.
    pub fn address_bytes(&self) -> Result<[u8; 20]> {
        let hex_part = self
            .address
            .strip_prefix("0x")
            .or_else(|| self.address.strip_prefix("0X"))
            .unwrap_or(&self.address);
        let bytes = hex::decode(hex_part)
            .map_err(|e| Error::Deployment(format!("invalid contract address: {e}")))?;
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::Deployment(format!(
                "contract address must be 20 bytes, got {}",
                bytes.len()
            ))
        })
    }

    /// Whether the ABI declares a function with the given name.
    #[must_use]
    pub fn has_function(&self, name: &str) -> bool {
        self.abi.iter().any(|fragment| {
            fragment.get("type").and_then(serde_json::Value::as_str) == Some("function")
                && fragment.get("name").and_then(serde_json::Value::as_str) == Some(name)
        })
    }
}
