//! Journal facts and their serialized form.
//!
//! A fact records something the ledger has already committed: an event was
//! created, a ticket was minted, a ticket was validated. Facts are immutable
//! and replaying them in order rebuilds the ledger.
//!
//! Facts are encoded with `bincode`. The journal stores the versioned type
//! name next to the bytes so a reader can tell what it is looking at without
//! decoding.
//!
//! # Example
//!
//! ```
//! use eventchain_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum SeatFact {
//!     SeatHeld { seat: u32 },
//!     SeatFreed { seat: u32 },
//! }
//!
//! impl Event for SeatFact {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             SeatFact::SeatHeld { .. } => "SeatHeld.v1",
//!             SeatFact::SeatFreed { .. } => "SeatFreed.v1",
//!         }
//!     }
//! }
//! ```

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for fact encoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize a fact to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize a fact from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// The stored type name does not match the decoded fact.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// A fact that can be journaled and replayed.
///
/// `event_type()` must return a stable name carrying a schema version
/// (`"TicketMinted.v1"`). Bump the suffix when the payload changes shape.
pub trait Event: Send + Sync + 'static {
    /// Returns the versioned type name of this fact.
    fn event_type(&self) -> &'static str;

    /// Serialize this fact to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the fact cannot be encoded.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize a fact from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// were produced by an incompatible schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }

    /// Decode a journaled fact, checking that the stored type name matches.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` for undecodable bytes and
    /// `EventError::UnknownEventType` when the payload decodes to a fact of a
    /// different type than the one recorded.
    fn from_serialized(serialized: &SerializedEvent) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        let fact = Self::from_bytes(&serialized.data)?;
        if fact.event_type() != serialized.event_type {
            return Err(EventError::UnknownEventType(serialized.event_type.clone()));
        }
        Ok(fact)
    }
}

/// A fact ready for storage: type name, encoded payload, optional metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedEvent {
    /// The versioned type name (e.g. `"EventCreated.v1"`).
    pub event_type: String,

    /// The bincode-encoded fact.
    pub data: Vec<u8>,

    /// Optional JSON metadata (caller identity, correlation id).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event from raw parts.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Encode a fact.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the fact cannot be encoded.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
