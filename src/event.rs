//! Service event system.

use crate::types::VerificationStatus;
use tokio::sync::broadcast;

/// Events emitted by the service.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// Service has started and is accepting connections.
    Started {
        /// Bound listen address.
        addr: std::net::SocketAddr,
    },

    /// Service is shutting down.
    ShuttingDown,

    /// A client session completed its handshake.
    SessionOpened {
        /// Session identifier.
        session_id: String,
    },

    /// A client session closed.
    SessionClosed {
        /// Session identifier.
        session_id: String,
        /// Why it closed.
        reason: String,
    },

    /// A detection was verified and published.
    DetectionVerified {
        /// Canonical plate.
        plate: String,
        /// Verification outcome.
        status: VerificationStatus,
        /// Number of sessions the result was queued for.
        delivered: usize,
    },
}

/// Channel for receiving service events.
pub type ServiceEventsChannel = broadcast::Receiver<ServiceEvent>;

/// Sender for service events.
pub type ServiceEventsSender = broadcast::Sender<ServiceEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (ServiceEventsSender, ServiceEventsChannel) {
    broadcast::channel(256)
}
