//! Client sessions: one task per live WebSocket connection.
//!
//! ```text
//! Connecting ──welcome sent──► Open ──close/timeout/errors/shutdown──► Closing ──drained──► Closed
//!      │                                                                                  ▲
//!      └───────────────────────────── handshake failed ──────────────────────────────────┘
//! ```
//!
//! While open, a session selects over inbound frames, its hub queue, the
//! heartbeat and the service shutdown signal. Leaving `Open` removes the
//! session and all its subscriptions from the hub before the queue is
//! drained.

pub mod protocol;

pub use protocol::{ClientMessage, ProtocolError, ServerMessage};

use crate::config::SessionConfig;
use crate::event::{ServiceEvent, ServiceEventsSender};
use crate::hub::{NotificationHub, OutboundQueue, SubscriptionHandle};
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registering with the hub and sending `welcome`.
    Connecting,
    /// Exchanging messages.
    Open,
    /// Unregistered; flushing queued results.
    Closing,
    /// Finished.
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open | Self::Closed)
                | (Self::Open, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

/// Why a session left `Open` (or never reached it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection.
    ClientClosed,
    /// No pong within the heartbeat timeout.
    HeartbeatTimeout,
    /// Reading or writing the socket failed.
    Transport(String),
    /// Too many consecutive malformed messages.
    ProtocolErrors(u32),
    /// The service is shutting down.
    Shutdown,
    /// The `welcome` frame could not be sent.
    HandshakeFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::ProtocolErrors(n) => write!(f, "{n} consecutive protocol errors"),
            Self::Shutdown => write!(f, "service shutdown"),
            Self::HandshakeFailed(e) => write!(f, "handshake failed: {e}"),
        }
    }
}

/// One downstream client connection.
pub struct ClientSession {
    id: String,
    hub: Arc<NotificationHub>,
    config: SessionConfig,
    state: SessionState,
    events: Option<ServiceEventsSender>,
}

impl ClientSession {
    /// Create a session with a fresh id.
    #[must_use]
    pub fn new(hub: Arc<NotificationHub>, config: SessionConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            hub,
            config,
            state: SessionState::Connecting,
            events: None,
        }
    }

    /// Announce open/close on the service event channel.
    #[must_use]
    pub fn with_events(mut self, events: ServiceEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {:?} -> {next:?}",
            self.state
        );
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    /// Drive the session until it closes.
    ///
    /// `sink`/`stream` are the two halves of the socket; `shutdown` flips to
    /// `true` when the service stops.
    pub async fn run<Si, St, E>(
        mut self,
        mut sink: Si,
        mut stream: St,
        mut shutdown: watch::Receiver<bool>,
    ) -> CloseReason
    where
        Si: Sink<Message> + Unpin,
        Si::Error: fmt::Display,
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let queue = self.hub.register_session(&self.id);

        let welcome = ServerMessage::Welcome {
            session_id: self.id.clone(),
        };
        let handshake = tokio::time::timeout(
            self.config.heartbeat_timeout,
            send(&mut sink, &welcome),
        )
        .await
        .unwrap_or_else(|_| Err("client did not accept welcome in time".to_string()));
        if let Err(e) = handshake {
            warn!(session_id = %self.id, error = %e, "Session handshake failed");
            self.hub.remove_session(&self.id);
            self.transition(SessionState::Closed);
            return CloseReason::HandshakeFailed(e);
        }

        self.transition(SessionState::Open);
        info!(session_id = %self.id, "Session opened");
        self.emit(ServiceEvent::SessionOpened {
            session_id: self.id.clone(),
        });

        let reason = self
            .serve(&mut sink, &mut stream, &queue, &mut shutdown)
            .await;

        self.transition(SessionState::Closing);
        let removed = self.hub.remove_session(&self.id).unwrap_or(0);
        queue.close();
        if !matches!(reason, CloseReason::Transport(_)) {
            self.drain(&mut sink, &queue).await;
        }

        self.transition(SessionState::Closed);
        info!(
            session_id = %self.id,
            %reason,
            subscriptions_removed = removed,
            dropped = queue.dropped(),
            "Session closed"
        );
        self.emit(ServiceEvent::SessionClosed {
            session_id: self.id.clone(),
            reason: reason.to_string(),
        });
        reason
    }

    async fn serve<Si, St, E>(
        &self,
        sink: &mut Si,
        stream: &mut St,
        queue: &OutboundQueue,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CloseReason
    where
        Si: Sink<Message> + Unpin,
        Si::Error: fmt::Display,
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        if *shutdown.borrow() {
            return CloseReason::Shutdown;
        }

        let interval = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let liveness = sleep_until(Instant::now() + self.config.heartbeat_timeout);
        tokio::pin!(liveness);
        let mut protocol_errors = 0u32;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => return CloseReason::Shutdown,

                frame = stream.next() => {
                    let text = match frame {
                        None | Some(Ok(Message::Close(_))) => return CloseReason::ClientClosed,
                        Some(Err(e)) => return CloseReason::Transport(e.to_string()),
                        Some(Ok(Message::Pong(_))) => {
                            liveness.as_mut().reset(Instant::now() + self.config.heartbeat_timeout);
                            continue;
                        }
                        Some(Ok(Message::Ping(_))) => continue,
                        Some(Ok(Message::Binary(_))) => Err(ProtocolError::Binary),
                        Some(Ok(Message::Text(text))) => Ok(text),
                    };

                    let reply = match text.and_then(|text| ClientMessage::parse(&text)) {
                        Ok(ClientMessage::Pong) => {
                            liveness.as_mut().reset(Instant::now() + self.config.heartbeat_timeout);
                            Ok(None)
                        }
                        Ok(message) => self.apply(message),
                        Err(e) => Err(e),
                    };

                    let reply = match reply {
                        Ok(reply) => {
                            protocol_errors = 0;
                            reply
                        }
                        Err(e) => {
                            protocol_errors += 1;
                            warn!(session_id = %self.id, error = %e, protocol_errors, "Protocol error");
                            Some(ServerMessage::Error { message: e.to_string() })
                        }
                    };

                    if let Some(reply) = reply {
                        let deadline = liveness.deadline();
                        if let Err(reason) = self.send_bounded(sink, &reply, deadline, shutdown).await {
                            return reason;
                        }
                    }
                    if protocol_errors > self.config.max_protocol_errors {
                        return CloseReason::ProtocolErrors(protocol_errors);
                    }
                }

                item = queue.pop() => {
                    let Some(result) = item else {
                        return CloseReason::Shutdown;
                    };
                    let message = ServerMessage::verification(&result);
                    let deadline = liveness.deadline();
                    if let Err(reason) = self.send_bounded(sink, &message, deadline, shutdown).await {
                        return reason;
                    }
                }

                () = &mut liveness => {
                    warn!(session_id = %self.id, timeout = ?self.config.heartbeat_timeout, "Heartbeat timed out");
                    return CloseReason::HeartbeatTimeout;
                }

                _ = heartbeat.tick() => {
                    let deadline = liveness.deadline();
                    let ping = self.send_bounded(sink, &ServerMessage::Ping, deadline, shutdown);
                    if let Err(reason) = ping.await {
                        return reason;
                    }
                }
            }
        }
    }

    fn apply(&self, message: ClientMessage) -> Result<Option<ServerMessage>, ProtocolError> {
        let reply = match message {
            ClientMessage::Subscribe { filter } => {
                let handle = self.hub.subscribe(&self.id, filter)?;
                ServerMessage::Subscribed {
                    id: handle.subscription_id,
                }
            }
            ClientMessage::Unsubscribe { id } => {
                let handle = SubscriptionHandle {
                    session_id: self.id.clone(),
                    subscription_id: id,
                };
                let removed = self.hub.unsubscribe(&handle);
                ServerMessage::Unsubscribed {
                    id: handle.subscription_id,
                    removed,
                }
            }
            ClientMessage::Pong => return Ok(None),
        };
        Ok(Some(reply))
    }

    /// Send while open. A client that stops reading cannot hold the session
    /// past its liveness deadline or past shutdown.
    async fn send_bounded<Si>(
        &self,
        sink: &mut Si,
        message: &ServerMessage,
        deadline: Instant,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), CloseReason>
    where
        Si: Sink<Message> + Unpin,
        Si::Error: fmt::Display,
    {
        tokio::select! {
            biased;

            _ = shutdown.changed() => Err(CloseReason::Shutdown),

            sent = timeout_at(deadline, send(sink, message)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(CloseReason::Transport(e)),
                Err(_) => {
                    warn!(session_id = %self.id, "Client stopped reading before heartbeat deadline");
                    Err(CloseReason::HeartbeatTimeout)
                }
            },
        }
    }

    /// Flush queued results and send the Close frame, all within
    /// `drain_timeout`.
    async fn drain<Si>(&self, sink: &mut Si, queue: &OutboundQueue)
    where
        Si: Sink<Message> + Unpin,
        Si::Error: fmt::Display,
    {
        let flush = async {
            let mut flushed = 0usize;
            while let Some(result) = queue.try_pop() {
                if send(sink, &ServerMessage::verification(&result)).await.is_err() {
                    return flushed;
                }
                flushed += 1;
            }
            let _ = sink.send(Message::Close(None)).await;
            flushed
        };

        match tokio::time::timeout(self.config.drain_timeout, flush).await {
            Ok(flushed) => debug!(session_id = %self.id, flushed, "Session queue drained"),
            Err(_) => warn!(
                session_id = %self.id,
                remaining = queue.len(),
                "Session drain timed out"
            ),
        }
    }

    fn emit(&self, event: ServiceEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

async fn send<Si>(sink: &mut Si, message: &ServerMessage) -> Result<(), String>
where
    Si: Sink<Message> + Unpin,
    Si::Error: fmt::Display,
{
    let text = message.to_json().map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}
