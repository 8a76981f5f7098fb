//! Relay wire protocol between sync clients and the `todosync` relay server.
//!
//! Frames are postcard-encoded and carried in binary WebSocket messages.
//! Record payloads are opaque to the relay: it stores and forwards the bytes
//! produced by [`crate::codec::encode_record`] without inspecting them.

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// Messages exchanged between relay clients and the relay server.
///
/// Client requests carry a `request_id` which the server echoes in its
/// reply so a single connection can multiplex concurrent requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// Client asks for the current record of `user`.
    Fetch {
        /// Correlation id echoed in the reply.
        request_id: u64,
        /// Identity whose record is requested.
        user: String,
    },

    /// Client replaces the stored record of `user`.
    Upsert {
        /// Correlation id echoed in the reply.
        request_id: u64,
        /// Identity whose record is written.
        user: String,
        /// Encoded record bytes.
        payload: Vec<u8>,
    },

    /// Client asks to receive [`RelayMessage::Changed`] for `user`.
    Subscribe {
        /// Correlation id echoed in the reply.
        request_id: u64,
        /// Identity to watch.
        user: String,
    },

    /// Client stops watching `user`. The server does not reply.
    Unsubscribe {
        /// Identity to stop watching.
        user: String,
    },

    /// Server reply to [`RelayMessage::Fetch`].
    State {
        /// Correlation id of the request.
        request_id: u64,
        /// Stored record bytes, or `None` for a first-time user.
        payload: Option<Vec<u8>>,
    },

    /// Server acknowledges an upsert or subscribe.
    Ack {
        /// Correlation id of the request.
        request_id: u64,
    },

    /// Server pushes a record that was just written for a watched user.
    Changed {
        /// Identity whose record changed.
        user: String,
        /// Encoded record bytes.
        payload: Vec<u8>,
    },

    /// Server reports an error condition.
    Error {
        /// Correlation id of the failed request, if the request was decodable.
        request_id: Option<u64>,
        /// Human-readable error description.
        reason: String,
    },
}

impl RelayMessage {
    /// Returns the correlation id for replies, if this message carries one.
    #[must_use]
    pub const fn reply_id(&self) -> Option<u64> {
        match self {
            Self::State { request_id, .. } | Self::Ack { request_id } => Some(*request_id),
            Self::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

/// Encodes a [`RelayMessage`] into bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode(msg: &RelayMessage) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`RelayMessage`] from bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid frame.
pub fn decode(bytes: &[u8]) -> Result<RelayMessage, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
