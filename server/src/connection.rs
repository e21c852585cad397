//! Per-connection plumbing: the bounded outbound queue, the lifecycle state
//! machine, and the context that turns inbound frames into relay actions.

use std::fmt;

use sketchroom_shared::{normalize_session_id, ClientId, ClientMessage, DrawEvent, ServerMessage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{RoutingError, TransportError};

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Sending half of one client's outbound queue.
///
/// The queue is bounded; when it is full the new message is dropped so a
/// slow reader never holds up the relay.
#[derive(Clone)]
pub struct Connection {
    client_id: ClientId,
    outbound: mpsc::Sender<ServerMessage>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id)
            .field("closed", &self.outbound.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn open(client_id: ClientId, capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                client_id,
                outbound,
            },
            receiver,
        )
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.outbound.try_send(message).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(self.client_id),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed(self.client_id),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket is open and `connected` has been sent, no session yet.
    Connecting,
    Joined { session_id: String },
    Left,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot go from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ConnectionState::Joined { session_id } => Some(session_id),
            _ => None,
        }
    }

    /// Applies a transition. `Closed` is terminal and `Left` is only
    /// reachable from `Joined`.
    pub fn transition(&mut self, to: ConnectionState) -> Result<(), InvalidTransition> {
        let allowed = match (&*self, &to) {
            (ConnectionState::Closed, _) => false,
            (_, ConnectionState::Closed) => true,
            (_, ConnectionState::Joined { .. }) => true,
            (ConnectionState::Joined { .. }, ConnectionState::Left) => true,
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.clone(),
                to,
            });
        }
        *self = to;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    First,
    InOrder,
    Gap { missing: u64 },
    Stale { last_seen: u64 },
}

/// Watches one client's `sequence_no` stream within a session. Gaps are
/// reported and tolerated; repeats and regressions are flagged stale.
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last_seen: Option<u64>,
}

impl SequenceTracker {
    pub fn reset(&mut self) {
        self.last_seen = None;
    }

    pub fn observe(&mut self, sequence_no: u64) -> SequenceCheck {
        let check = match self.last_seen {
            None => SequenceCheck::First,
            Some(last) if sequence_no <= last => return SequenceCheck::Stale { last_seen: last },
            Some(last) if sequence_no == last + 1 => SequenceCheck::InOrder,
            Some(last) => SequenceCheck::Gap {
                missing: sequence_no - last - 1,
            },
        };
        self.last_seen = Some(sequence_no);
        check
    }
}

/// What the relay should do in response to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    Join { session_id: String },
    Leave { session_id: String },
    Publish(DrawEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("invalid session id {0:?}")]
    InvalidSessionId(String),
    #[error("invalid draw: {0}")]
    InvalidDraw(#[from] sketchroom_shared::InvalidDraw),
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

impl RejectReason {
    /// Routing problems are dropped silently; malformed input is reported
    /// back to the sender.
    pub fn notify_sender(&self) -> bool {
        !matches!(self, RejectReason::Routing(_))
    }
}

/// Everything the socket loop knows about its client.
#[derive(Debug)]
pub struct ConnectionContext {
    client_id: ClientId,
    state: ConnectionState,
    sequence: SequenceTracker,
}

impl ConnectionContext {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            state: ConnectionState::Connecting,
            sequence: SequenceTracker::default(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.state.session_id()
    }

    pub fn accept(&mut self, message: ClientMessage) -> Result<RelayAction, RejectReason> {
        match message {
            ClientMessage::Join { session_id } => self.join(&session_id),
            ClientMessage::Leave { session_id } => {
                if self.session_id() != Some(session_id.as_str()) {
                    return Err(RoutingError::NotAMember {
                        client_id: self.client_id,
                        session_id,
                    }
                    .into());
                }
                self.move_to(ConnectionState::Left)?;
                Ok(RelayAction::Leave { session_id })
            }
            ClientMessage::Draw(request) => {
                request.validate()?;
                let current = self
                    .state
                    .session_id()
                    .ok_or(RoutingError::NotJoined(self.client_id))?;
                if current != request.session_id {
                    return Err(RoutingError::NotAMember {
                        client_id: self.client_id,
                        session_id: request.session_id,
                    }
                    .into());
                }
                match self.sequence.observe(request.sequence_no) {
                    SequenceCheck::Stale { last_seen } => {
                        return Err(RoutingError::StaleSequence {
                            client_id: self.client_id,
                            sequence_no: request.sequence_no,
                            last_seen,
                        }
                        .into());
                    }
                    SequenceCheck::Gap { missing } => {
                        debug!(
                            client_id = %self.client_id,
                            session_id = %current,
                            missing,
                            "sequence gap"
                        );
                    }
                    SequenceCheck::First | SequenceCheck::InOrder => {}
                }
                Ok(RelayAction::Publish(request.stamp(self.client_id)))
            }
        }
    }

    /// Every accepted join, including one for the current session, starts a
    /// fresh sequence numbering.
    pub fn join(&mut self, session_id: &str) -> Result<RelayAction, RejectReason> {
        let session_id = normalize_session_id(session_id)
            .ok_or_else(|| RejectReason::InvalidSessionId(session_id.to_string()))?;
        self.move_to(ConnectionState::Joined {
            session_id: session_id.clone(),
        })?;
        self.sequence.reset();
        Ok(RelayAction::Join { session_id })
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn move_to(&mut self, to: ConnectionState) -> Result<(), RoutingError> {
        self.state
            .transition(to)
            .map_err(|_| RoutingError::Closed(self.client_id))
    }
}
