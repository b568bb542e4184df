//! Session handshake and reconnect state machine.
//!
//! The connection does no IO itself: the client hands it a channel into the
//! socket writer on open and feeds it every inbound text frame. States:
//!
//! ```text
//! Disconnected ──open──▶ Connected ──handshake reply──▶ Ready
//!       ▲                    │                            │
//!       └──────── close / error (after backoff) ──────────┘
//! ```

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SyncError;
use crate::protocol::{HandshakeReply, HandshakeRequest, InboundMessage, OutboundMessage};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Socket open, handshake sent.
    Connected,
    /// Session confirmed; payloads may flow.
    Ready,
}

/// What an inbound frame meant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Ready { session: Uuid, client: Uuid },
    /// The authority answered with a different session than the one we had.
    SessionConflict { previous: Uuid, current: Uuid },
    Update(InboundMessage),
    /// Frame arrived while no socket is current.
    Ignored,
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Option<Duration>) -> Self {
        Self {
            initial,
            current: initial,
            max,
        }
    }

    /// Delay for the next attempt; doubles the one after.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        let doubled = self.current.saturating_mul(2);
        self.current = match self.max {
            Some(max) => doubled.min(max),
            None => doubled,
        };
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Capability the engine needs to put payloads on the wire.
pub trait Transport {
    fn is_ready(&self) -> bool;

    /// Send an application payload. Fails with `NotConnected` unless ready.
    fn send(&mut self, message: &OutboundMessage) -> Result<(), SyncError>;
}

#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    session: Option<Uuid>,
    client: Option<Uuid>,
    backoff: Backoff,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    /// Bumped on every open/close so events from a replaced socket are dropped.
    generation: u64,
}

impl Connection {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session: None,
            client: None,
            backoff,
            outgoing: None,
            generation: 0,
        }
    }

    /// Adopt a freshly opened socket and send the handshake.
    ///
    /// Returns the generation tagging events from this socket.
    pub fn open(&mut self, outgoing: mpsc::UnboundedSender<String>) -> Result<u64, SyncError> {
        self.generation += 1;
        self.outgoing = Some(outgoing);
        self.state = ConnectionState::Connected;
        self.backoff.reset();
        log::info!(
            "Socket open (generation {}), sending handshake for session {:?}",
            self.generation,
            self.session
        );

        let handshake = OutboundMessage::Handshake(HandshakeRequest {
            session: self.session,
            client: self.client,
        });
        self.write(&handshake)?;
        Ok(self.generation)
    }

    /// Interpret one inbound text frame.
    pub fn on_message(&mut self, text: &str) -> Result<ConnectionEvent, SyncError> {
        match self.state {
            ConnectionState::Disconnected => {
                log::debug!("Dropping frame received while disconnected");
                Ok(ConnectionEvent::Ignored)
            }
            ConnectionState::Connected => self.on_handshake(text),
            ConnectionState::Ready => Ok(ConnectionEvent::Update(InboundMessage::decode(text)?)),
        }
    }

    fn on_handshake(&mut self, text: &str) -> Result<ConnectionEvent, SyncError> {
        let reply = match HandshakeReply::decode(text) {
            Ok(reply) => reply,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };
        let (Some(session), Some(client)) = (reply.session, reply.client) else {
            self.close();
            return Err(SyncError::MalformedHandshake(
                "reply is missing the session or client id".into(),
            ));
        };

        let previous = self.session.replace(session);
        self.client = Some(client);
        self.state = ConnectionState::Ready;

        match previous {
            Some(previous) if previous != session => {
                log::error!("Session changed from {} to {}", previous, session);
                Ok(ConnectionEvent::SessionConflict {
                    previous,
                    current: session,
                })
            }
            _ => {
                log::info!("Session {} ready (client {})", session, client);
                Ok(ConnectionEvent::Ready { session, client })
            }
        }
    }

    /// Socket `generation` closed or failed.
    ///
    /// Returns the delay before reconnecting, or `None` when the event came
    /// from a socket that was already replaced.
    pub fn on_close(&mut self, generation: u64) -> Option<Duration> {
        if generation != self.generation {
            log::debug!("Ignoring close of stale socket generation {}", generation);
            return None;
        }
        self.close();
        Some(self.next_backoff())
    }

    /// Delay before the next reconnect attempt.
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.backoff.next();
        log::info!("Reconnecting in {} ms", delay.as_millis());
        delay
    }

    /// Drop the current socket.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Disconnected {
            log::debug!("Closing socket generation {}", self.generation);
        }
        self.outgoing = None;
        self.state = ConnectionState::Disconnected;
        self.generation += 1;
    }

    fn write(&mut self, message: &OutboundMessage) -> Result<(), SyncError> {
        let text = message.encode()?;
        let tx = self.outgoing.as_ref().ok_or(SyncError::NotConnected)?;
        tx.send(text)
            .map_err(|_| SyncError::Transport("socket writer is gone".into()))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> Option<Uuid> {
        self.session
    }

    pub fn client(&self) -> Option<Uuid> {
        self.client
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

impl Transport for Connection {
    fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    fn send(&mut self, message: &OutboundMessage) -> Result<(), SyncError> {
        if !self.is_ready() {
            return Err(SyncError::NotConnected);
        }
        self.write(message)
    }
}
