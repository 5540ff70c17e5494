//! # EventChain Core
//!
//! Shared abstractions for the EventChain ticket ledger.
//!
//! The ledger keeps its authoritative state in memory and records every
//! committed mutation as an immutable fact in an append-only journal. This
//! crate holds the pieces that sit between the ledger and its storage:
//!
//! - [`event::Event`]: a fact that can be encoded into a [`event::SerializedEvent`]
//! - [`event_store::EventStore`]: the append/load seam implemented by storage backends
//! - [`stream::StreamId`] / [`stream::Version`]: journal addressing
//! - [`environment::Clock`]: injected time source
//!
//! ## Example
//!
//! ```ignore
//! use eventchain_core::event::{Event, SerializedEvent};
//! use eventchain_core::stream::StreamId;
//!
//! let fact = LedgerFact::TicketValidated { /* ... */ };
//! let serialized = SerializedEvent::from_event(&fact, None)?;
//! store.append_events(StreamId::new("eventchain-ledger"), None, vec![serialized]).await?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod event;
pub mod event_store;
pub mod stream;

/// Environment module - injected dependencies
///
/// Everything non-deterministic that the ledger needs is abstracted behind a
/// trait here so tests can pin it down.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use eventchain_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time source used outside of tests.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
