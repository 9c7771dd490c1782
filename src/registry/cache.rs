//! TTL cache of registry records with per-plate lookup coalescing.
//!
//! Records are fresh for `ttl`, then served stale for `stale_grace` while a
//! refresh runs, then treated as absent. Concurrent misses for the same plate
//! share one upstream fetch: the first caller starts it, later callers wait
//! on its outcome.

use super::client::{RegistryError, RegistryRecord};
use crate::config::CacheConfig;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Outcome of one upstream registry fetch.
pub type LookupOutcome = Result<Option<RegistryRecord>, RegistryError>;

type InFlight = watch::Receiver<Option<LookupOutcome>>;

/// Result of a cache probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Within TTL.
    Fresh(RegistryRecord),
    /// Past TTL but within the stale grace period.
    Stale(RegistryRecord),
    /// Absent or fully expired.
    Miss,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    record: RegistryRecord,
    cached_at: Instant,
    ttl_expires_at: Instant,
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CacheStats {
    /// Fresh hits.
    pub hits: u64,
    /// Hits served from the stale grace period.
    pub stale_hits: u64,
    /// Misses.
    pub misses: u64,
    /// Records stored.
    pub additions: u64,
    /// Records discarded because a newer block was already cached.
    pub superseded: u64,
    /// Upstream fetches started.
    pub fetches: u64,
    /// Callers that joined a fetch already in flight.
    pub coalesced: u64,
}

impl CacheStats {
    /// Hit rate (fresh and stale) as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.stale_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// Clears a plate's in-flight slot when its fetch task ends, including by
/// panic, so later callers start a new fetch instead of joining a dead one.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    plate: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.plate);
    }
}

/// Verification cache keyed by normalized plate.
#[derive(Clone)]
pub struct VerificationCache {
    entries: Arc<Mutex<LruCache<String, CacheEntry>>>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    stats: Arc<Mutex<CacheStats>>,
    ttl: Duration,
    stale_grace: Duration,
}

impl VerificationCache {
    /// Create a cache from configuration.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(cap))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(Mutex::new(CacheStats::default())),
            ttl: config.ttl,
            stale_grace: config.stale_grace,
        }
    }

    /// Default TTL applied to fetched records.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Probe the cache for a plate.
    pub fn get(&self, plate: &str) -> CacheLookup {
        let now = Instant::now();
        let lookup = {
            let mut entries = self.entries.lock();
            let probe = entries.get(plate).map(|entry| {
                if now < entry.ttl_expires_at {
                    CacheLookup::Fresh(entry.record.clone())
                } else if now < entry.ttl_expires_at + self.stale_grace {
                    trace!(
                        plate,
                        age_ms = now.duration_since(entry.cached_at).as_millis() as u64,
                        "Serving stale registry record"
                    );
                    CacheLookup::Stale(entry.record.clone())
                } else {
                    CacheLookup::Miss
                }
            });
            match probe {
                Some(CacheLookup::Miss) => {
                    entries.pop(plate);
                    CacheLookup::Miss
                }
                Some(hit) => hit,
                None => CacheLookup::Miss,
            }
        };

        let mut stats = self.stats.lock();
        match lookup {
            CacheLookup::Fresh(_) => stats.hits += 1,
            CacheLookup::Stale(_) => stats.stale_hits += 1,
            CacheLookup::Miss => stats.misses += 1,
        }
        lookup
    }

    /// Store a record for `ttl`.
    ///
    /// A record read at a lower block than the live entry is discarded; on
    /// equal blocks the later write wins. Returns whether the record was kept.
    pub fn put(&self, plate: &str, record: RegistryRecord, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.peek(plate) {
            let live = now < existing.ttl_expires_at + self.stale_grace;
            if live && existing.record.as_of_block > record.as_of_block {
                debug!(
                    plate,
                    cached_block = existing.record.as_of_block,
                    incoming_block = record.as_of_block,
                    "Discarding registry record older than cached one"
                );
                self.stats.lock().superseded += 1;
                return false;
            }
        }

        entries.put(
            plate.to_string(),
            CacheEntry {
                record,
                cached_at: now,
                ttl_expires_at: now + ttl,
            },
        );
        self.stats.lock().additions += 1;
        true
    }

    /// Fetch a plate through the single-flight table and wait for the outcome.
    ///
    /// If a fetch for `plate` is already running, `fetch` is dropped unused
    /// and the caller waits for the running one. A successful record is stored
    /// with the cache TTL before waiters are released.
    pub async fn load<F>(&self, plate: &str, fetch: F) -> LookupOutcome
    where
        F: Future<Output = LookupOutcome> + Send + 'static,
    {
        let mut rx = self.join_or_start(plate, fetch);
        let outcome = rx.wait_for(Option::is_some).await.map(|value| value.clone());
        match outcome {
            Ok(Some(outcome)) => outcome,
            _ => Err(RegistryError::Transient(
                "registry fetch ended without a result".to_string(),
            )),
        }
    }

    /// Start a background fetch unless one is already running for `plate`.
    pub fn refresh<F>(&self, plate: &str, fetch: F)
    where
        F: Future<Output = LookupOutcome> + Send + 'static,
    {
        let _ = self.join_or_start(plate, fetch);
    }

    fn join_or_start<F>(&self, plate: &str, fetch: F) -> InFlight
    where
        F: Future<Output = LookupOutcome> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock();
        if let Some(rx) = in_flight.get(plate) {
            self.stats.lock().coalesced += 1;
            trace!(plate, "Joining in-flight registry fetch");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(plate.to_string(), rx.clone());
        self.stats.lock().fetches += 1;

        let cache = self.clone();
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            plate: plate.to_string(),
        };
        tokio::spawn(async move {
            let outcome = fetch.await;
            if let Ok(Some(record)) = &outcome {
                cache.put(&guard.plate, record.clone(), cache.ttl);
            }
            drop(guard);
            let _ = tx.send(Some(outcome));
        });

        rx
    }

    /// Number of fetches currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Get the current number of entries in the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
