//! In-memory registry backed by a fixtures file.

use super::client::{RegistryClient, RegistryError, RegistryRecord};
use crate::error::{Error, Result};
use crate::types::normalize_plate;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Registry held in memory, keyed by normalized plate.
///
/// Loaded from a JSON object mapping plate strings to records:
///
/// ```json
/// { "AB123": { "owner": "0xab…", "status": "active", "asOfBlock": 10 } }
/// ```
#[derive(Debug, Default)]
pub struct StaticRegistry {
    records: RwLock<HashMap<String, RegistryRecord>>,
}

impl StaticRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from a JSON fixtures file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: HashMap<String, RegistryRecord> = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid registry fixtures: {e}")))?;

        let registry = Self::new();
        for (plate, record) in raw {
            registry.insert(&plate, record);
        }
        info!(
            "Loaded {} static registry records from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Insert or replace the record for a plate.
    pub fn insert(&self, plate: &str, record: RegistryRecord) {
        self.records.write().insert(normalize_plate(plate), record);
    }

    /// Remove the record for a plate.
    pub fn remove(&self, plate: &str) -> Option<RegistryRecord> {
        self.records.write().remove(&normalize_plate(plate))
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn lookup(&self, plate: &str) -> std::result::Result<Option<RegistryRecord>, RegistryError> {
        let record = self.records.read().get(plate).cloned();
        debug!(plate, found = record.is_some(), "Static registry lookup");
        Ok(record)
    }
}
