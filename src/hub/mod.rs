//! Notification hub: fan-out of verification results to live sessions.
//!
//! ```text
//! publish(result)
//!        │
//!        ▼  read lock
//! ┌──────────────────────────────┐
//! │ session ─► [filter, filter]  │──► any match? ──► OutboundQueue (drop-oldest)
//! │ session ─► [filter]          │──► ...
//! └──────────────────────────────┘
//! ```
//!
//! Delivery is at-most-once: a session gets each matching result once, and
//! nothing is replayed to sessions that connect later.

mod filter;
mod queue;

pub use filter::SubscriptionFilter;
pub use queue::OutboundQueue;

use crate::config::HubConfig;
use crate::types::VerificationResult;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Identifies one subscription of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    /// Owning session.
    pub session_id: String,
    /// Subscription id, unique across the hub.
    pub subscription_id: String,
}

/// Subscription errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The session is not registered (already closed).
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// The session reached its subscription limit.
    #[error("too many subscriptions (max {0})")]
    TooManySubscriptions(usize),
}

/// Hub counters for monitoring.
#[derive(Debug, Default, Clone, Serialize)]
pub struct HubStats {
    /// Registered sessions.
    pub sessions: usize,
    /// Live subscriptions across all sessions.
    pub subscriptions: usize,
    /// Results published.
    pub published: u64,
    /// Results queued to sessions.
    pub deliveries: u64,
    /// Results dropped from full queues of live sessions.
    pub dropped: u64,
}

struct SessionEntry {
    queue: Arc<OutboundQueue>,
    subscriptions: HashMap<String, SubscriptionFilter>,
}

/// Process-wide registry of sessions and their subscriptions.
pub struct NotificationHub {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    config: HubConfig,
    next_subscription: AtomicU64,
    published: AtomicU64,
    deliveries: AtomicU64,
}

impl NotificationHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        info!(
            "Notification hub initialized (queue_size={}, max_subscriptions={})",
            config.outbound_queue_size, config.max_subscriptions_per_session
        );
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            next_subscription: AtomicU64::new(1),
            published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
        }
    }

    /// Register a session and return its outbound queue.
    ///
    /// Registering an id twice returns the existing queue.
    pub fn register_session(&self, session_id: &str) -> Arc<OutboundQueue> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                queue: Arc::new(OutboundQueue::new(self.config.outbound_queue_size)),
                subscriptions: HashMap::new(),
            });
        debug!(session_id, "Session registered with hub");
        Arc::clone(&entry.queue)
    }

    /// Remove a session and all its subscriptions.
    ///
    /// Returns the number of subscriptions removed, or `None` if the session
    /// was not registered.
    pub fn remove_session(&self, session_id: &str) -> Option<usize> {
        let entry = self.sessions.write().remove(session_id)?;
        let removed = entry.subscriptions.len();
        debug!(session_id, removed, "Session removed from hub");
        Some(removed)
    }

    /// Add a subscription for a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or at its subscription
    /// limit.
    pub fn subscribe(
        &self,
        session_id: &str,
        filter: SubscriptionFilter,
    ) -> Result<SubscriptionHandle, HubError> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| HubError::UnknownSession(session_id.to_string()))?;

        let max = self.config.max_subscriptions_per_session;
        if entry.subscriptions.len() >= max {
            return Err(HubError::TooManySubscriptions(max));
        }

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let subscription_id = format!("sub-{id}");
        let filter = filter.normalized();
        debug!(session_id, subscription_id = %subscription_id, ?filter, "Created subscription");
        entry.subscriptions.insert(subscription_id.clone(), filter);

        Ok(SubscriptionHandle {
            session_id: session_id.to_string(),
            subscription_id,
        })
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self
            .sessions
            .write()
            .get_mut(&handle.session_id)
            .is_some_and(|entry| entry.subscriptions.remove(&handle.subscription_id).is_some());
        if removed {
            debug!(
                session_id = %handle.session_id,
                subscription_id = %handle.subscription_id,
                "Removed subscription"
            );
        }
        removed
    }

    /// Queue a result for every session with at least one matching
    /// subscription.
    ///
    /// Returns the number of sessions the result was queued for.
    pub fn publish(&self, result: VerificationResult) -> usize {
        let result = Arc::new(result);
        let mut delivered = 0;
        {
            let sessions = self.sessions.read();
            for (session_id, entry) in sessions.iter() {
                if entry.subscriptions.values().any(|f| f.matches(&result)) {
                    if entry.queue.push(Arc::clone(&result)) {
                        delivered += 1;
                    }
                    trace!(session_id = %session_id, plate = %result.plate_normalized, "Queued result");
                }
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        debug!(
            plate = %result.plate_normalized,
            status = %result.status,
            delivered,
            "Published verification result"
        );
        delivered
    }

    /// Number of subscriptions a session holds.
    #[must_use]
    pub fn subscription_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map_or(0, |entry| entry.subscriptions.len())
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let sessions = self.sessions.read();
        HubStats {
            sessions: sessions.len(),
            subscriptions: sessions.values().map(|e| e.subscriptions.len()).sum(),
            published: self.published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped: sessions.values().map(|e| e.queue.dropped()).sum(),
        }
    }
}
