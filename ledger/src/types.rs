//! Domain types for the EventChain ledger.
//!
//! Identifiers, value objects and the two records the ledger manages:
//! [`Event`] (owned by the registry) and [`Ticket`] (owned by the ledger).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of an event. Assigned sequentially from 0 and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw event number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw event number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a ticket, unique across the whole ledger (not per event).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(u64);

impl TicketId {
    /// Wrap a raw ticket number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw ticket number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated caller, typically a wallet address.
///
/// The ledger never verifies identities; the caller layer hands them in
/// already authenticated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Wrap a caller identity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// A non-negative amount in the smallest currency unit (wei, cents, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Creates an amount from minor units.
    #[must_use]
    pub const fn from_minor(units: u64) -> Self {
        Self(units)
    }

    /// Creates an amount from a signed input, rejecting negatives.
    #[must_use]
    pub const fn try_from_signed(units: i64) -> Option<Self> {
        if units < 0 {
            None
        } else {
            Some(Self(units.unsigned_abs()))
        }
    }

    /// The amount in minor units.
    #[must_use]
    pub const fn minor(self) -> u64 {
        self.0
    }

    /// True for a free event.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maximum number of tickets an event may issue. Always at least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capacity(u32);

impl Capacity {
    /// Creates a capacity from a signed input, rejecting zero, negatives and
    /// values that do not fit in `u32`.
    #[must_use]
    pub fn try_from_signed(value: i64) -> Option<Self> {
        u32::try_from(value).ok().filter(|v| *v > 0).map(Self)
    }

    /// The capacity as a number of tickets.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Input for creating an event.
///
/// `ticket_price` and `max_tickets` are signed so that out-of-range input from
/// the caller layer is rejected with a specific error instead of being
/// unrepresentable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// When the event starts
    pub start_time: DateTime<Utc>,
    /// When the event ends (must be after `start_time`)
    pub end_time: DateTime<Utc>,
    /// Price per ticket in minor units (must be ≥ 0)
    pub ticket_price: i64,
    /// Number of tickets the event may issue (must be ≥ 1)
    pub max_tickets: i64,
    /// Venue or address
    pub location: String,
    /// Artwork reference
    pub image_uri: String,
}

/// An event record.
///
/// Everything except `tickets_issued` is fixed at creation.
/// `tickets_issued` only moves through a slot reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Identity that created the event
    pub organizer: Identity,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Venue or address
    pub location: String,
    /// Artwork reference
    pub image_uri: String,
    /// When the event starts
    pub start_time: DateTime<Utc>,
    /// When the event ends
    pub end_time: DateTime<Utc>,
    /// Price per ticket
    pub ticket_price: Money,
    /// Ticket cap
    pub max_tickets: Capacity,
    /// Tickets minted so far, `0 ≤ tickets_issued ≤ max_tickets`
    pub tickets_issued: u32,
    /// When the event was created
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Remaining mintable slots.
    #[must_use]
    pub const fn available_tickets(&self) -> u32 {
        self.max_tickets.value().saturating_sub(self.tickets_issued)
    }

    /// True once every slot has been issued.
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.tickets_issued >= self.max_tickets.value()
    }
}

/// Read view of an event with its derived availability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    /// The event record
    pub event: Event,
    /// `max_tickets - tickets_issued`
    pub available_tickets: u32,
}

impl From<Event> for EventDetails {
    fn from(event: Event) -> Self {
        let available_tickets = event.available_tickets();
        Self {
            event,
            available_tickets,
        }
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Ticket lifecycle. `Unused → Used` is the only transition; `Used` is terminal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Minted and not yet presented
    #[default]
    Unused,
    /// Consumed at the door
    Used {
        /// When the ticket was validated
        validated_at: DateTime<Utc>,
        /// Who validated it
        validated_by: Identity,
    },
}

impl TicketStatus {
    /// True once the ticket has been validated.
    #[must_use]
    pub const fn is_used(&self) -> bool {
        matches!(self, Self::Used { .. })
    }
}

/// A ticket record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Identity that minted the ticket
    pub owner: Identity,
    /// Payment attached to the mint, if the caller layer routed one through
    pub payment: Option<Money>,
    /// When the ticket was minted
    pub minted_at: DateTime<Utc>,
    /// Current lifecycle state
    pub status: TicketStatus,
}

impl Ticket {
    /// True once the ticket has been validated.
    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.status.is_used()
    }
}

// ============================================================================
// Validation Policy
// ============================================================================

/// Who may validate (consume) a ticket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationPolicy {
    /// Any caller
    Anyone,
    /// Only the ticket's owner
    #[default]
    OwnerOnly,
    /// Only the event's organizer
    OrganizerOnly,
    /// The ticket's owner or the event's organizer
    OwnerOrOrganizer,
}

impl ValidationPolicy {
    /// Decide whether `validator` may consume a ticket held by `owner` for an
    /// event run by `organizer`.
    #[must_use]
    pub fn permits(self, validator: &Identity, owner: &Identity, organizer: &Identity) -> bool {
        match self {
            Self::Anyone => true,
            Self::OwnerOnly => validator == owner,
            Self::OrganizerOnly => validator == organizer,
            Self::OwnerOrOrganizer => validator == owner || validator == organizer,
        }
    }

    /// Kebab-case name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anyone => "anyone",
            Self::OwnerOnly => "owner-only",
            Self::OrganizerOnly => "organizer-only",
            Self::OwnerOrOrganizer => "owner-or-organizer",
        }
    }
}

impl fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anyone" => Ok(Self::Anyone),
            "owner" | "owner-only" => Ok(Self::OwnerOnly),
            "organizer" | "organizer-only" => Ok(Self::OrganizerOnly),
            "owner-or-organizer" => Ok(Self::OwnerOrOrganizer),
            other => Err(format!("unknown validation policy: {other}")),
        }
    }
}
