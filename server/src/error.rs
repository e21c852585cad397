use sketchroom_shared::{ClientId, SnapshotFileDecodeError};

/// Failure to hand a message to one connection. Never affects other
/// recipients of the same broadcast.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("outbound queue for client {0} is full")]
    QueueFull(ClientId),
    #[error("connection for client {0} is closed")]
    Closed(ClientId),
}

/// A message that could not be routed. Logged and dropped, never reported
/// back to the sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("session {0} does not exist")]
    UnknownSession(String),
    #[error("client {client_id} is not a member of session {session_id}")]
    NotAMember {
        client_id: ClientId,
        session_id: String,
    },
    #[error("client {0} has not joined a session")]
    NotJoined(ClientId),
    #[error("client {client_id} sent sequence {sequence_no} at or below {last_seen}")]
    StaleSequence {
        client_id: ClientId,
        sequence_no: u64,
        last_seen: u64,
    },
    #[error("connection for client {0} is closed")]
    Closed(ClientId),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot {0} not found")]
    NotFound(String),
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot {id} is unreadable: {source}")]
    Decode {
        id: String,
        source: SnapshotFileDecodeError,
    },
    #[error("storage backend: {0}")]
    Backend(String),
}
