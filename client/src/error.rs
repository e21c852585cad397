use sketchroom_shared::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("server did not send a connected message")]
    Handshake,
    #[error("timed out connecting")]
    Timeout,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection is closed")]
    Closed,
}

/// Failures of the snapshot store round trip. `NotFound` is kept apart from
/// `Persistence` so callers can tell a deleted snapshot from an unavailable
/// store.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot {0} not found")]
    NotFound(String),
    #[error("no anti-forgery token available for a mutating request")]
    MissingToken,
    #[error("snapshot store rejected the request ({status}): {message}")]
    Persistence { status: u16, message: String },
    #[error("snapshot store unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("snapshot image is not a raster: {0}")]
    Raster(#[from] RasterError),
}

impl SnapshotError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SnapshotError::NotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RasterError {
    #[error("raster payload is malformed")]
    InvalidData,
    #[error("raster is {width}x{height} but carries {len} bytes")]
    SizeMismatch { width: u32, height: u32, len: usize },
}
