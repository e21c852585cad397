//! Persisted snapshot records and their on-disk encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bincode::{Decode, Encode};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const SNAPSHOT_FILE_MAGIC: [u8; 4] = *b"SKRS";
pub const SNAPSHOT_FILE_VERSION: u32 = 1;
const SNAPSHOT_HEADER_LEN: usize = SNAPSHOT_FILE_MAGIC.len() + std::mem::size_of::<u32>();

/// A named full-canvas raster, as exchanged with the snapshot store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /snapshots` and `PUT /snapshots/{id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCreated {
    pub id: String,
}

#[derive(Encode, Decode)]
struct SnapshotFileData {
    id: String,
    name: String,
    image: Vec<u8>,
    created_at_ms: i64,
    updated_at_ms: i64,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotFileDecodeError {
    #[error("unsupported snapshot file version {0}")]
    UnsupportedVersion(u32),
    #[error("snapshot file is malformed")]
    InvalidData,
}

pub fn encode_snapshot_file(snapshot: &Snapshot) -> Vec<u8> {
    let data = SnapshotFileData {
        id: snapshot.id.clone(),
        name: snapshot.name.clone(),
        image: snapshot.image.clone(),
        created_at_ms: snapshot.created_at.timestamp_millis(),
        updated_at_ms: snapshot.updated_at.timestamp_millis(),
    };
    let mut payload = Vec::with_capacity(SNAPSHOT_HEADER_LEN + snapshot.image.len() + 64);
    payload.extend_from_slice(&SNAPSHOT_FILE_MAGIC);
    payload.extend_from_slice(&SNAPSHOT_FILE_VERSION.to_le_bytes());
    let body = bincode::encode_to_vec(&data, bincode::config::standard()).unwrap_or_default();
    payload.extend_from_slice(&body);
    payload
}

pub fn decode_snapshot_file(payload: &[u8]) -> Result<Snapshot, SnapshotFileDecodeError> {
    if !(payload.len() >= SNAPSHOT_HEADER_LEN && payload.starts_with(&SNAPSHOT_FILE_MAGIC)) {
        return Err(SnapshotFileDecodeError::InvalidData);
    }
    let version = u32::from_le_bytes(
        payload[SNAPSHOT_FILE_MAGIC.len()..SNAPSHOT_HEADER_LEN]
            .try_into()
            .map_err(|_| SnapshotFileDecodeError::InvalidData)?,
    );
    let body = &payload[SNAPSHOT_HEADER_LEN..];
    let data: SnapshotFileData = match version {
        1 => bincode::decode_from_slice(body, bincode::config::standard())
            .map(|(data, _)| data)
            .map_err(|_| SnapshotFileDecodeError::InvalidData)?,
        _ => return Err(SnapshotFileDecodeError::UnsupportedVersion(version)),
    };
    Ok(Snapshot {
        id: data.id,
        name: data.name,
        image: data.image,
        created_at: from_millis(data.created_at_ms)?,
        updated_at: from_millis(data.updated_at_ms)?,
    })
}

fn from_millis(value: i64) -> Result<DateTime<Utc>, SnapshotFileDecodeError> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or(SnapshotFileDecodeError::InvalidData)
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
