//! Broker Wire Envelope
//!
//! The payload exchanged with the broker in both directions: a JSON object
//! with a `room_id` and the message text. Outbound, the hub serializes the
//! envelope before handing it to the publisher; inbound, the feed loop
//! deserializes it before fanning out to the room.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};


/// Errors that can occur while encoding or decoding the wire envelope
#[derive(Debug)]
pub enum EnvelopeError {
    /// Payload is not a valid `{room_id, message}` JSON object
    Malformed(serde_json::Error),
    /// Room identifier is empty
    EmptyRoomId,
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed envelope: {}", e),
            Self::EmptyRoomId => write!(f, "envelope has an empty room_id"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl From<serde_json::Error> for EnvelopeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e)
    }
}

/// The `{room_id, message}` envelope carried on the broker topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target room identifier
    pub room_id: String,
    /// Message text as submitted by the originating client
    pub message: String,
}

impl Envelope {
    /// Build an envelope from a room id and a raw client payload.
    ///
    /// Client messages are text on the wire; invalid UTF-8 is replaced
    /// rather than rejected, matching WebSocket text frame semantics.
    pub fn new(room_id: impl Into<String>, message: &[u8]) -> Self {
        Self {
            room_id: room_id.into(),
            message: String::from_utf8_lossy(message).into_owned(),
        }
    }

    /// Serialize the envelope for publishing
    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        let json = serde_json::to_vec(self)?;
        Ok(Bytes::from(json))
    }

    /// Deserialize an envelope delivered by the broker feed
    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_slice(payload)?;
        if envelope.room_id.is_empty() {
            return Err(EnvelopeError::EmptyRoomId);
        }
        Ok(envelope)
    }
}
