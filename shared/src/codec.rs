//! Frame encodings for the WebSocket wire.
//!
//! Text frames carry JSON, binary frames carry bincode. Both encode the same
//! message types so either side may pick whichever framing it prefers.

use bincode::{Decode, Encode};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Text,
    Binary,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("bincode decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

pub fn encode_text<T: Serialize>(message: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_binary<T: Encode>(message: &T) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::encode_to_vec(message, bincode::config::standard())?)
}

pub fn decode_binary<T: Decode<()>>(payload: &[u8]) -> Result<T, CodecError> {
    let (message, read) = bincode::decode_from_slice(payload, bincode::config::standard())?;
    if read != payload.len() {
        return Err(CodecError::TrailingBytes(payload.len() - read));
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientId, ClientMessage, DrawRequest, ServerMessage, Tool};

    #[test]
    fn binary_frames_carry_the_same_messages() {
        let message = ClientMessage::Draw(DrawRequest {
            session_id: "room1".into(),
            x: 1.5,
            y: -2.0,
            color: "#123456".into(),
            brush_size: 8.0,
            tool: Tool::Eraser,
            sequence_no: 42,
            stroke_start: true,
        });
        let payload = encode_binary(&message).unwrap();
        let decoded: ClientMessage = decode_binary(&payload).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut payload = encode_binary(&ServerMessage::Connected {
            client_id: ClientId(1),
        })
        .unwrap();
        payload.push(0);
        assert!(matches!(
            decode_binary::<ServerMessage>(&payload),
            Err(CodecError::TrailingBytes(1))
        ));
    }

    #[test]
    fn malformed_text_is_an_error() {
        assert!(decode_text::<ClientMessage>("{\"type\":\"paint\"}").is_err());
    }
}
