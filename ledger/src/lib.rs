//! # EventChain Ledger
//!
//! Event registry and ticket ledger with single-use validation.
//!
//! Organizers create events with a fixed ticket capacity. Attendees mint
//! tickets against that capacity, and each ticket can be validated exactly
//! once. Every committed mutation is journaled through an
//! [`EventStore`](eventchain_core::event_store::EventStore), and opening a
//! ledger replays the journal.
//!
//! ## Guarantees
//!
//! - `tickets_issued` never exceeds `max_tickets`, even under concurrent mints
//! - A ticket goes `Unused → Used` once and never back
//! - Event and ticket ids are assigned sequentially and never reused
//! - A failed operation leaves every record as it was
//!
//! ## Example
//!
//! ```no_run
//! use eventchain_ledger::{Identity, LedgerConfig, NewEvent, TicketLedger};
//! use eventchain_core::environment::{Clock, SystemClock};
//! use eventchain_testing::InMemoryEventStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), eventchain_ledger::LedgerError> {
//! let clock = Arc::new(SystemClock);
//! let store = Arc::new(InMemoryEventStore::new());
//! let ledger = TicketLedger::open(&LedgerConfig::default(), store, clock.clone()).await?;
//!
//! let organizer = Identity::new("0xorganizer");
//! let event_id = ledger
//!     .create_event(
//!         &organizer,
//!         NewEvent {
//!             name: "Launch Party".to_string(),
//!             description: String::new(),
//!             start_time: clock.now() + chrono::Duration::days(1),
//!             end_time: clock.now() + chrono::Duration::days(2),
//!             ticket_price: 0,
//!             max_tickets: 100,
//!             location: "Rooftop".to_string(),
//!             image_uri: String::new(),
//!         },
//!     )
//!     .await?;
//!
//! let fan = Identity::new("0xfan");
//! let ticket_id = ledger.mint_ticket(event_id, &fan).await?;
//! ledger.validate_ticket(ticket_id, &fan).await?;
//! assert!(ledger.is_ticket_used(ticket_id).await?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod types;

pub use config::{LedgerConfig, PostgresConfig};
pub use error::{LedgerError, Record};
pub use journal::{Journal, LedgerFact};
pub use ledger::TicketLedger;
pub use registry::{EventRegistry, SlotReservation};
pub use types::{
    Capacity, Event, EventDetails, EventId, Identity, Money, NewEvent, Ticket, TicketId,
    TicketStatus, ValidationPolicy,
};
