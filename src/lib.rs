//! # plate-verifier
//!
//! Correlates license plate detections with an on-chain vehicle registry and
//! streams verification status to live WebSocket sessions.
//!
//! ## Pipeline
//!
//! ```text
//! Detector ──► DetectionIngestor ──► RegistryVerifier ──► NotificationHub ──► sessions
//!                 (validate,            │                    (filters,
//!                  dedup)               ▼                     bounded queues)
//!                               VerificationCache
//!                                       │
//!                                       ▼
//!                                RegistryClient
//! ```
//!
//! The ingestor never waits for verification: each accepted detection is
//! verified and published in its own task. The verifier never fails; registry
//! trouble surfaces as [`VerificationStatus::VerificationError`].

pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod hub;
pub mod ingest;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;
pub mod types;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use event::{ServiceEvent, ServiceEventsChannel};
pub use hub::{NotificationHub, SubscriptionFilter, SubscriptionHandle};
pub use ingest::{Accepted, DetectionIngestor, Rejection};
pub use registry::{
    RecordStatus, RegistryClient, RegistryError, RegistryRecord, RegistryVerifier,
    VerificationCache,
};
pub use service::{RunningService, ServiceBuilder};
pub use types::{
    normalize_plate, DetectionEvent, RawDetection, VerificationResult, VerificationStatus,
};
