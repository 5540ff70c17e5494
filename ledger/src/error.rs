//! Error taxonomy for ledger operations.
//!
//! Every failed mutation leaves the records it touched exactly as they were.
//! The ledger never retries; retry is the caller's decision.

use crate::types::{EventId, Identity, Money, TicketId, ValidationPolicy};
use chrono::{DateTime, Utc};
use eventchain_core::event::EventError;
use eventchain_core::event_store::EventStoreError;
use std::fmt;
use thiserror::Error;

/// A record that a lookup can miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Record {
    /// An event id
    Event(EventId),
    /// A ticket id
    Ticket(TicketId),
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "Event {id}"),
            Self::Ticket(id) => write!(f, "Ticket {id}"),
        }
    }
}

/// Errors returned by [`crate::EventRegistry`] and [`crate::TicketLedger`].
#[derive(Error, Debug)]
pub enum LedgerError {
    /// `start_time` is not strictly before `end_time`.
    #[error("Invalid time range: start {start} is not before end {end}")]
    InvalidRange {
        /// Requested start
        start: DateTime<Utc>,
        /// Requested end
        end: DateTime<Utc>,
    },

    /// `max_tickets` is zero, negative, or too large.
    #[error("Invalid capacity: {0} (must be between 1 and {max})", max = u32::MAX)]
    InvalidCapacity(i64),

    /// `ticket_price` is negative.
    #[error("Invalid ticket price: {0} (must not be negative)")]
    InvalidPrice(i64),

    /// Unknown event or ticket id.
    #[error("{0} not found")]
    NotFound(Record),

    /// Every slot of the event has been issued.
    #[error("Event {0} is sold out")]
    SoldOut(EventId),

    /// The ticket was validated before.
    #[error("Ticket {0} has already been used")]
    AlreadyUsed(TicketId),

    /// The validation policy rejects this validator.
    #[error("{validator} may not validate ticket {ticket_id} under the {policy} policy")]
    Unauthorized {
        /// Ticket being validated
        ticket_id: TicketId,
        /// Rejected caller
        validator: Identity,
        /// Policy in force
        policy: ValidationPolicy,
    },

    /// The attached payment does not cover the ticket price.
    #[error("Insufficient payment for event {event_id}: required {required}, offered {offered}")]
    InsufficientPayment {
        /// Event being purchased
        event_id: EventId,
        /// Ticket price
        required: Money,
        /// Amount offered
        offered: Money,
    },

    /// The journal's backing store failed or did not answer in time.
    #[error("Ledger storage unavailable: {0}")]
    Unavailable(String),

    /// A fact could not be encoded or decoded.
    #[error("Journal codec error: {0}")]
    Codec(String),

    /// Replaying the journal would break a ledger invariant.
    #[error("Journal is inconsistent at fact {position}: {reason}")]
    Corrupted {
        /// Zero-based index of the offending fact
        position: usize,
        /// What went wrong
        reason: String,
    },
}

impl LedgerError {
    /// Short machine-readable name, used as a metrics label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "invalid_range",
            Self::InvalidCapacity(_) => "invalid_capacity",
            Self::InvalidPrice(_) => "invalid_price",
            Self::NotFound(_) => "not_found",
            Self::SoldOut(_) => "sold_out",
            Self::AlreadyUsed(_) => "already_used",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InsufficientPayment { .. } => "insufficient_payment",
            Self::Unavailable(_) => "unavailable",
            Self::Codec(_) => "codec",
            Self::Corrupted { .. } => "corrupted",
        }
    }

    /// True for `NotFound` on any record type.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<EventStoreError> for LedgerError {
    fn from(error: EventStoreError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl From<EventError> for LedgerError {
    fn from(error: EventError) -> Self {
        Self::Codec(error.to_string())
    }
}
