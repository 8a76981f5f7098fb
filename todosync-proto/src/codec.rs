//! JSON encoding for snapshots and remote records.
//!
//! Snapshots are stored in the local key-value cache as JSON text; remote
//! records travel to the backend as JSON bytes which the relay keeps opaque.

use crate::task::{RemoteRecord, Snapshot};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The input was empty where a document was required.
    #[error("empty document")]
    Empty,
}

/// Encodes a [`Snapshot`] as the persisted JSON layout.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the snapshot cannot be serialized.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<String, CodecError> {
    serde_json::to_string(snapshot).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`Snapshot`] from its persisted JSON layout.
///
/// # Errors
///
/// Returns `CodecError::Empty` for blank input and
/// `CodecError::Serialization` if the text is not a valid snapshot.
pub fn decode_snapshot(text: &str) -> Result<Snapshot, CodecError> {
    if text.trim().is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`RemoteRecord`] into JSON bytes for the backend.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the record cannot be serialized.
pub fn encode_record(record: &RemoteRecord) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(record).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`RemoteRecord`] from JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Empty` for an empty payload and
/// `CodecError::Serialization` if the bytes are not a valid record.
pub fn decode_record(bytes: &[u8]) -> Result<RemoteRecord, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
