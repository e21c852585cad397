use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

pub mod codec;
pub mod snapshot_format;

pub use codec::{decode_binary, decode_text, encode_binary, encode_text, CodecError, Framing};
pub use snapshot_format::{
    decode_snapshot_file, encode_snapshot_file, Snapshot, SnapshotBody, SnapshotCreated,
    SnapshotFileDecodeError,
};

pub const MAX_SESSION_ID_LEN: usize = 64;
pub const MIN_BRUSH_SIZE: f32 = 1.0;
pub const MAX_BRUSH_SIZE: f32 = 60.0;
pub const DEFAULT_COLOR: &str = "#1f1f1f";
pub const DEFAULT_BRUSH_SIZE: f32 = 6.0;

/// Relay-assigned identity of one connection. Never reused within a process.
#[derive(
    Serialize, Deserialize, Encode, Decode, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One normalized point sample as produced locally, before it is addressed
/// to a session and numbered.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DrawSample {
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub brush_size: f32,
    pub tool: Tool,
    pub stroke_start: bool,
}

impl DrawSample {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A draw message as sent by a client. The relay stamps it with the origin
/// to produce a [`DrawEvent`].
#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
pub struct DrawRequest {
    pub session_id: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub brush_size: f32,
    pub tool: Tool,
    pub sequence_no: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stroke_start: bool,
}

impl DrawRequest {
    pub fn from_sample(session_id: impl Into<String>, sequence_no: u64, sample: DrawSample) -> Self {
        Self {
            session_id: session_id.into(),
            x: sample.x,
            y: sample.y,
            color: sample.color,
            brush_size: sample.brush_size,
            tool: sample.tool,
            sequence_no,
            stroke_start: sample.stroke_start,
        }
    }

    pub fn stamp(self, origin_client_id: ClientId) -> DrawEvent {
        DrawEvent {
            origin_client_id,
            session_id: self.session_id,
            x: self.x,
            y: self.y,
            color: self.color,
            brush_size: self.brush_size,
            tool: self.tool,
            sequence_no: self.sequence_no,
            stroke_start: self.stroke_start,
        }
    }

    /// Checks the content without rewriting it. The relay forwards what the
    /// sender produced or nothing at all.
    pub fn validate(&self) -> Result<(), InvalidDraw> {
        if normalize_session_id(&self.session_id).as_deref() != Some(self.session_id.as_str()) {
            return Err(InvalidDraw::SessionId);
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(InvalidDraw::Coordinates);
        }
        if !is_hex_color(&self.color) {
            return Err(InvalidDraw::Color);
        }
        if !self.brush_size.is_finite()
            || self.brush_size < MIN_BRUSH_SIZE
            || self.brush_size > MAX_BRUSH_SIZE
        {
            return Err(InvalidDraw::BrushSize);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidDraw {
    #[error("session id is not valid")]
    SessionId,
    #[error("coordinates must be finite")]
    Coordinates,
    #[error("color must be a #rgb or #rrggbb hex string")]
    Color,
    #[error("brush size out of range")]
    BrushSize,
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
pub struct DrawEvent {
    pub origin_client_id: ClientId,
    pub session_id: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub brush_size: f32,
    pub tool: Tool,
    pub sequence_no: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stroke_start: bool,
}

impl DrawEvent {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "draw")]
    Draw(DrawRequest),
    #[serde(rename = "join")]
    Join { session_id: String },
    #[serde(rename = "leave")]
    Leave { session_id: String },
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { client_id: ClientId },
    #[serde(rename = "joined")]
    Joined {
        session_id: String,
        members: Vec<ClientId>,
    },
    #[serde(rename = "left")]
    Left { session_id: String },
    #[serde(rename = "peer_joined")]
    PeerJoined {
        session_id: String,
        client_id: ClientId,
    },
    #[serde(rename = "peer_left")]
    PeerLeft {
        session_id: String,
        client_id: ClientId,
    },
    #[serde(rename = "draw")]
    Draw(DrawEvent),
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::Left { .. } => "left",
            ServerMessage::PeerJoined { .. } => "peer_joined",
            ServerMessage::PeerLeft { .. } => "peer_left",
            ServerMessage::Draw(_) => "draw",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Accepts client supplied session ids: 1 to 64 characters drawn from
/// ASCII letters, digits, `-`, `_` and `.`. Surrounding whitespace is ignored.
pub fn normalize_session_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_SESSION_ID_LEN {
        return None;
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn is_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn sanitize_color(color: &str) -> String {
    if is_hex_color(color) {
        color.to_ascii_lowercase()
    } else {
        DEFAULT_COLOR.to_string()
    }
}

pub fn sanitize_size(size: f32) -> f32 {
    let size = if size.is_finite() {
        size
    } else {
        DEFAULT_BRUSH_SIZE
    };
    size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE)
}

fn is_false(value: &bool) -> bool {
    !*value
}
