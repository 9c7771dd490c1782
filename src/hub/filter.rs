//! Subscription filters.

use crate::types::{normalize_plate, VerificationResult, VerificationStatus};
use serde::{Deserialize, Serialize};

/// Predicate over verification results. All fields are ANDed; an empty
/// filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionFilter {
    /// Only results with this status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VerificationStatus>,
    /// Only plates starting with this prefix (normalized before matching).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate_prefix: Option<String>,
    /// Only results at or above this confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

impl SubscriptionFilter {
    /// Filter matching every result.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one status.
    #[must_use]
    pub fn with_status(mut self, status: VerificationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to a plate prefix.
    #[must_use]
    pub fn with_plate_prefix(mut self, prefix: &str) -> Self {
        self.plate_prefix = Some(prefix.to_string());
        self
    }

    /// Restrict to a minimum confidence.
    #[must_use]
    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    /// Canonical form: prefix normalized, an empty prefix dropped.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.plate_prefix = self
            .plate_prefix
            .map(|prefix| normalize_plate(&prefix))
            .filter(|prefix| !prefix.is_empty());
        self
    }

    /// Whether the result passes this filter.
    ///
    /// Expects a filter produced by [`Self::normalized`].
    #[must_use]
    pub fn matches(&self, result: &VerificationResult) -> bool {
        if self.status.is_some_and(|status| status != result.status) {
            return false;
        }
        if let Some(prefix) = &self.plate_prefix {
            if !result.plate_normalized.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if result.confidence < min {
                return false;
            }
        }
        true
    }
}
