//! Registry verifier combining the verification cache and registry client.
//!
//! This is the core verification logic: every detection resolves to a
//! [`VerificationResult`], and registry trouble is encoded in the result
//! rather than raised.

use super::cache::{CacheLookup, CacheStats, LookupOutcome, VerificationCache};
use super::client::{RegistryClient, RegistryError};
use crate::config::{CacheConfig, VerifierConfig};
use crate::types::{DetectionEvent, VerificationResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns detection events into verification results.
pub struct RegistryVerifier {
    /// Cache of registry records.
    cache: VerificationCache,
    /// Registry backend.
    client: Arc<dyn RegistryClient>,
    /// Retry policy.
    config: VerifierConfig,
}

impl RegistryVerifier {
    /// Create a new verifier.
    #[must_use]
    pub fn new(
        client: Arc<dyn RegistryClient>,
        config: VerifierConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        info!(
            "Registry verifier initialized (max_retries={}, per_attempt_timeout={:?}, cache_ttl={:?})",
            config.max_retries, config.per_attempt_timeout, cache_config.ttl
        );
        Self {
            cache: VerificationCache::new(cache_config),
            client,
            config,
        }
    }

    /// Verify one detection event.
    ///
    /// 1. Fresh cache hit: status from the cached record
    /// 2. Stale cache hit: status from the cached record, refresh in background
    /// 3. Miss: coalesced registry fetch with retries, bounded by the overall
    ///    deadline
    ///
    /// # Returns
    ///
    /// * `registered` / `revoked` / `expired` - Registry record found
    /// * `unknown` - Registry has no record for the plate
    /// * `verification_error` - Registry failed, permanently or after retries
    pub async fn verify(&self, event: &DetectionEvent) -> VerificationResult {
        let plate = event.plate_normalized();

        match self.cache.get(plate) {
            CacheLookup::Fresh(record) => {
                debug!(plate, "Registry record served from cache");
                return VerificationResult::from_record(event, record);
            }
            CacheLookup::Stale(record) => {
                debug!(plate, "Stale registry record served, refreshing");
                self.cache.refresh(plate, self.fetch(plate));
                return VerificationResult::from_record(event, record);
            }
            CacheLookup::Miss => {}
        }

        let deadline = self.config.overall_deadline();
        let outcome = match tokio::time::timeout(deadline, self.cache.load(plate, self.fetch(plate)))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(RegistryError::Transient(format!(
                "verification exceeded {deadline:?}"
            ))),
        };

        match outcome {
            Ok(Some(record)) => {
                info!(plate, status = ?record.status, block = record.as_of_block, "Plate resolved on registry");
                VerificationResult::from_record(event, record)
            }
            Ok(None) => {
                debug!(plate, "Plate not found on registry");
                VerificationResult::unknown(event)
            }
            Err(e) => {
                warn!(plate, error = %e, "Registry verification failed");
                VerificationResult::error(event)
            }
        }
    }

    /// Build the retrying fetch future for a plate.
    fn fetch(&self, plate: &str) -> impl std::future::Future<Output = LookupOutcome> + Send + 'static {
        lookup_with_retry(Arc::clone(&self.client), self.config.clone(), plate.to_string())
    }

    /// Get cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Get the number of cached entries.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Access the underlying cache.
    #[must_use]
    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }
}

/// Call the registry with per-attempt timeouts and exponential backoff.
///
/// Permanent errors stop immediately; transient errors and timeouts are
/// retried up to `max_retries` times. The whole loop is capped by the
/// overall deadline so a fetch never outlives the callers waiting on it.
async fn lookup_with_retry(
    client: Arc<dyn RegistryClient>,
    config: VerifierConfig,
    plate: String,
) -> LookupOutcome {
    let deadline = config.overall_deadline();
    let attempts = async {
        let mut last_error = RegistryError::Transient("no attempt made".to_string());

        for attempt in 0..=config.max_retries {
            let delay = config.backoff_before(attempt);
            if !delay.is_zero() {
                debug!(plate = %plate, attempt, ?delay, "Backing off before registry retry");
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(config.per_attempt_timeout, client.lookup(&plate)).await {
                Ok(Ok(found)) => return Ok(found),
                Ok(Err(e)) if !e.is_transient() => {
                    warn!(plate = %plate, attempt, error = %e, "Registry rejected lookup");
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!(plate = %plate, attempt, error = %e, "Registry lookup failed");
                    last_error = e;
                }
                Err(_) => {
                    warn!(plate = %plate, attempt, "Registry lookup timed out");
                    last_error = RegistryError::Transient(format!(
                        "attempt timed out after {:?}",
                        config.per_attempt_timeout
                    ));
                }
            }
        }

        Err(last_error)
    };

    tokio::time::timeout(deadline, attempts)
        .await
        .unwrap_or_else(|_| {
            Err(RegistryError::Transient(format!(
                "registry fetch exceeded {deadline:?}"
            )))
        })
}
