//! # EventChain Testing
//!
//! Test doubles for the EventChain ledger crates.
//!
//! This crate provides:
//! - [`FixedClock`] / [`StepClock`]: deterministic time sources
//! - [`InMemoryEventStore`]: journal storage with outage and latency injection
//!
//! ## Example
//!
//! ```ignore
//! use eventchain_testing::{test_clock, InMemoryEventStore};
//!
//! #[tokio::test]
//! async fn mint_survives_restart() {
//!     let store = InMemoryEventStore::new();
//!     let ledger = TicketLedger::open(config(), Arc::new(store.clone()), Arc::new(test_clock())).await?;
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use eventchain_core::environment::Clock;

pub mod event_store;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// ```
    /// use eventchain_testing::mocks::FixedClock;
    /// use eventchain_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that moves forward by a fixed step on every reading.
    ///
    /// Useful when a test needs distinct, ordered timestamps (mint before
    /// validation) without depending on wall time.
    #[derive(Debug)]
    pub struct StepClock {
        next: Mutex<DateTime<Utc>>,
        step: Duration,
    }

    impl StepClock {
        /// Start at `start`, advancing by `step` after each reading.
        #[must_use]
        pub const fn new(start: DateTime<Utc>, step: Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }
    }

    impl Clock for StepClock {
        #[allow(clippy::unwrap_used)] // Poisoning only follows a panicking test
        fn now(&self) -> DateTime<Utc> {
            let mut next = self.next.lock().unwrap();
            let now = *next;
            *next = now + self.step;
            now
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use event_store::InMemoryEventStore;
pub use mocks::{FixedClock, StepClock, test_clock};
