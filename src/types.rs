//! Detection and verification data model.

use crate::registry::{RecordStatus, RegistryRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonicalize a plate string: ASCII letters uppercased, everything that is
/// not an ASCII letter or digit removed.
///
/// ```
/// assert_eq!(plate_verifier::normalize_plate(" ab-123 "), "AB123");
/// ```
#[must_use]
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// An unvalidated detection as handed to the ingestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Plate text as reported by the detector.
    pub plate: String,
    /// Detector confidence, expected in `[0, 1]`.
    pub confidence: f64,
    /// Opaque detector request id used for deduplication.
    pub source_request_id: String,
}

impl RawDetection {
    /// Create a raw detection.
    #[must_use]
    pub fn new(
        plate: impl Into<String>,
        confidence: f64,
        source_request_id: impl Into<String>,
    ) -> Self {
        Self {
            plate: plate.into(),
            confidence,
            source_request_id: source_request_id.into(),
        }
    }
}

/// One validated plate sighting. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    plate_raw: String,
    plate_normalized: String,
    confidence: f64,
    source_request_id: String,
    observed_at: DateTime<Utc>,
}

impl DetectionEvent {
    /// Build an event from a raw detection, deriving the normalized plate.
    ///
    /// Validation is the ingestor's job; this only derives fields.
    #[must_use]
    pub fn from_raw(raw: RawDetection, observed_at: DateTime<Utc>) -> Self {
        let plate_normalized = normalize_plate(&raw.plate);
        Self {
            plate_raw: raw.plate,
            plate_normalized,
            confidence: raw.confidence,
            source_request_id: raw.source_request_id,
            observed_at,
        }
    }

    /// Plate text as reported.
    #[must_use]
    pub fn plate_raw(&self) -> &str {
        &self.plate_raw
    }

    /// Canonical plate used as correlation key.
    #[must_use]
    pub fn plate_normalized(&self) -> &str {
        &self.plate_normalized
    }

    /// Detector confidence.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Detector request id.
    #[must_use]
    pub fn source_request_id(&self) -> &str {
        &self.source_request_id
    }

    /// When the event was received.
    #[must_use]
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

/// Verification outcome for a plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Registry has no record for the plate.
    Unknown,
    /// Registry record is active.
    Registered,
    /// Registry record was revoked.
    Revoked,
    /// Registry record expired.
    Expired,
    /// Registry could not be consulted.
    VerificationError,
}

impl VerificationStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Registered => "registered",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::VerificationError => "verification_error",
        }
    }
}

impl From<RecordStatus> for VerificationStatus {
    fn from(status: RecordStatus) -> Self {
        match status {
            RecordStatus::Active => Self::Registered,
            RecordStatus::Revoked => Self::Revoked,
            RecordStatus::Expired => Self::Expired,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the verifier for one detection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Canonical plate.
    pub plate_normalized: String,
    /// Verification outcome.
    pub status: VerificationStatus,
    /// Confidence carried over from the detection.
    pub confidence: f64,
    /// Registry record the status was derived from, if any.
    pub registry_record: Option<RegistryRecord>,
    /// When the result was produced.
    pub resolved_at: DateTime<Utc>,
}

impl VerificationResult {
    /// Result backed by a registry record.
    #[must_use]
    pub fn from_record(event: &DetectionEvent, record: RegistryRecord) -> Self {
        Self {
            plate_normalized: event.plate_normalized().to_string(),
            status: record.status.into(),
            confidence: event.confidence(),
            registry_record: Some(record),
            resolved_at: Utc::now(),
        }
    }

    /// Result for a plate the registry does not know.
    #[must_use]
    pub fn unknown(event: &DetectionEvent) -> Self {
        Self::without_record(event, VerificationStatus::Unknown)
    }

    /// Result for a failed registry consultation.
    #[must_use]
    pub fn error(event: &DetectionEvent) -> Self {
        Self::without_record(event, VerificationStatus::VerificationError)
    }

    fn without_record(event: &DetectionEvent, status: VerificationStatus) -> Self {
        Self {
            plate_normalized: event.plate_normalized().to_string(),
            status,
            confidence: event.confidence(),
            registry_record: None,
            resolved_at: Utc::now(),
        }
    }

    /// Owner from the registry record, if present.
    #[must_use]
    pub fn registry_owner(&self) -> Option<&str> {
        self.registry_record.as_ref().map(|r| r.owner.as_str())
    }
}
