//! Detection ingestion: validation, deduplication and hand-off to
//! verification.
//!
//! `ingest` never waits on the registry. Each accepted detection is verified
//! and published to the hub in its own task.

mod dedup;

pub use dedup::DedupWindow;

use crate::config::IngestConfig;
use crate::event::{ServiceEvent, ServiceEventsSender};
use crate::hub::NotificationHub;
use crate::registry::RegistryVerifier;
use crate::types::{DetectionEvent, RawDetection, VerificationResult};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// An accepted detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    /// Monotonic sequence number (diagnostics only).
    pub sequence: u64,
    /// Normalized plate.
    pub plate: String,
}

/// Why a detection was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// The plate is empty after normalization.
    #[error("plate is empty")]
    EmptyPlate,

    /// Confidence is not within [0, 1].
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    /// The request id was already ingested within the dedup window.
    #[error("duplicate request id: {0}")]
    Duplicate(String),
}

/// Entry point of the pipeline.
pub struct DetectionIngestor {
    dedup: Mutex<DedupWindow>,
    sequence: AtomicU64,
    verifier: Arc<RegistryVerifier>,
    hub: Arc<NotificationHub>,
    events: Option<ServiceEventsSender>,
}

impl DetectionIngestor {
    /// Create an ingestor feeding `verifier` and publishing to `hub`.
    #[must_use]
    pub fn new(
        config: &IngestConfig,
        verifier: Arc<RegistryVerifier>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        info!(
            "Detection ingestor initialized (dedup_window={:?}, max_events={})",
            config.dedup_window, config.max_events_per_window
        );
        Self {
            dedup: Mutex::new(DedupWindow::new(
                config.dedup_window,
                config.max_events_per_window,
            )),
            sequence: AtomicU64::new(0),
            verifier,
            hub,
            events: None,
        }
    }

    /// Announce verified detections on the service event channel.
    #[must_use]
    pub fn with_events(mut self, events: ServiceEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate a detection and start its verification.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] for an empty plate, an out-of-range
    /// confidence, or a request id seen within the dedup window. Rejected
    /// detections are never verified.
    pub fn ingest(&self, raw: RawDetection) -> Result<Accepted, Rejection> {
        self.accept(raw).map(|(accepted, _)| accepted)
    }

    /// Like [`Self::ingest`], also returning the verification task.
    ///
    /// # Errors
    ///
    /// See [`Self::ingest`].
    pub fn ingest_tracked(
        &self,
        raw: RawDetection,
    ) -> Result<(Accepted, JoinHandle<VerificationResult>), Rejection> {
        self.accept(raw)
    }

    fn accept(
        &self,
        raw: RawDetection,
    ) -> Result<(Accepted, JoinHandle<VerificationResult>), Rejection> {
        let event = self.validate(raw, Utc::now())?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let accepted = Accepted {
            sequence,
            plate: event.plate_normalized().to_string(),
        };
        debug!(
            sequence,
            plate = %accepted.plate,
            request_id = event.source_request_id(),
            confidence = event.confidence(),
            "Detection accepted"
        );

        let verifier = Arc::clone(&self.verifier);
        let hub = Arc::clone(&self.hub);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let result = verifier.verify(&event).await;
            let delivered = hub.publish(result.clone());
            if let Some(events) = events {
                let _ = events.send(ServiceEvent::DetectionVerified {
                    plate: result.plate_normalized.clone(),
                    status: result.status,
                    delivered,
                });
            }
            result
        });

        Ok((accepted, handle))
    }

    fn validate(
        &self,
        raw: RawDetection,
        observed_at: chrono::DateTime<Utc>,
    ) -> Result<DetectionEvent, Rejection> {
        let confidence = raw.confidence;
        let event = DetectionEvent::from_raw(raw, observed_at);

        if event.plate_normalized().is_empty() {
            debug!(plate = event.plate_raw(), "Rejected detection with empty plate");
            return Err(Rejection::EmptyPlate);
        }
        if !(0.0..=1.0).contains(&confidence) {
            debug!(confidence, "Rejected detection with invalid confidence");
            return Err(Rejection::ConfidenceOutOfRange(confidence));
        }

        let request_id = event.source_request_id();
        if !request_id.is_empty() && !self.dedup.lock().insert(request_id, Instant::now()) {
            debug!(request_id, "Rejected duplicate detection");
            return Err(Rejection::Duplicate(request_id.to_string()));
        }

        Ok(event)
    }

    /// Number of detections accepted so far.
    #[must_use]
    pub fn accepted_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
