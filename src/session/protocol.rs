//! JSON wire protocol spoken on `/ws`.

use crate::hub::{HubError, SubscriptionFilter};
use crate::types::{VerificationResult, VerificationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Add a subscription.
    Subscribe {
        /// Filter; absent means everything.
        #[serde(default)]
        filter: SubscriptionFilter,
    },
    /// Remove a subscription.
    Unsubscribe {
        /// Subscription id from `subscribed`.
        id: String,
    },
    /// Heartbeat reply.
    Pong,
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the frame is not a known
    /// message.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake completed.
    Welcome {
        /// Session identifier.
        session_id: String,
    },
    /// Subscription created.
    Subscribed {
        /// Subscription id.
        id: String,
    },
    /// Unsubscribe processed.
    Unsubscribed {
        /// Subscription id.
        id: String,
        /// Whether the subscription existed.
        removed: bool,
    },
    /// A verification result matching one of the session's subscriptions.
    Verification {
        /// Normalized plate.
        plate: String,
        /// Verification outcome.
        status: VerificationStatus,
        /// Detector confidence.
        confidence: f64,
        /// Owner from the registry, when a record was found.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registry_owner: Option<String>,
        /// When the result was produced.
        resolved_at: DateTime<Utc>,
    },
    /// Heartbeat probe; clients answer with `pong`.
    Ping,
    /// A client message was rejected.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerMessage {
    /// Frame a verification result.
    #[must_use]
    pub fn verification(result: &VerificationResult) -> Self {
        Self::Verification {
            plate: result.plate_normalized.clone(),
            status: result.status,
            confidence: result.confidence,
            registry_owner: result.registry_owner().map(str::to_string),
            resolved_at: result.resolved_at,
        }
    }

    /// Encode as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A client message the session could not act on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not valid JSON or not a known message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Binary frames are not part of the protocol.
    #[error("binary frames are not supported")]
    Binary,

    /// The hub refused the request.
    #[error(transparent)]
    Rejected(#[from] HubError),
}
