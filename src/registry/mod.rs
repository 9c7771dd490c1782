//! Registry lookup, caching and verification.
//!
//! # Architecture
//!
//! ```text
//! DetectionEvent
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Check cache         │
//! └─────────┬───────────┘
//!           │
//!    ┌──────┼──────────────┐
//!    │      │              │
//!  FRESH  STALE          MISS
//!    │      │              │
//!    │      ▼              ▼
//!    │   serve +     join or start
//!    │   refresh     coalesced fetch
//!    │                     │
//!    │          ┌──────────┼──────────┐
//!    │          │          │          │
//!    │        FOUND    NOT FOUND    FAILED
//!    │          │          │          │
//!    ▼          ▼          ▼          ▼
//!  status   cache +     unknown   verification_error
//!           status
//! ```

mod cache;
mod client;
mod deployment;
mod evm;
mod static_registry;
mod verifier;

pub use cache::{CacheLookup, CacheStats, LookupOutcome, VerificationCache};
pub use client::{RecordStatus, RegistryClient, RegistryError, RegistryRecord};
pub use deployment::DeploymentDescriptor;
pub use evm::EvmRegistryClient;
pub use static_registry::StaticRegistry;
pub use verifier::RegistryVerifier;
