//! Event store trait: the storage seam under the ledger journal.
//!
//! The ledger only needs two things from storage: append facts to a stream
//! and read them back in order. Implementations:
//!
//! - `PostgresEventStore` (in `eventchain-postgres`): durable storage
//! - `InMemoryEventStore` (in `eventchain-testing`): tests, with outage and
//!   latency injection
//!
//! # Example
//!
//! ```no_run
//! use eventchain_core::event_store::{EventStore, EventStoreError};
//! use eventchain_core::stream::StreamId;
//!
//! async fn replay_len(store: &dyn EventStore) -> Result<usize, EventStoreError> {
//!     let facts = store.load_events(StreamId::new("eventchain-ledger"), None).await?;
//!     Ok(facts.len())
//! }
//! ```

use crate::event::SerializedEvent;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`EventStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventStoreError>> + Send + 'a>>;

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: expected version doesn't match current version.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream where the conflict occurred.
        stream_id: StreamId,
        /// The version the caller expected.
        expected: Version,
        /// The stream's actual version.
        actual: Version,
    },

    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Database query error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Append-only storage for journal streams.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the ledger shares one store across
/// all concurrent callers as `Arc<dyn EventStore>`.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the trait can
/// be used as a trait object.
pub trait EventStore: Send + Sync {
    /// Append facts to a stream.
    ///
    /// With `expected_version = Some(v)` the append only succeeds if the stream
    /// is currently at `v`. With `None` the facts go to the end of the stream.
    /// Either all facts are appended or none are.
    ///
    /// Returns the stream version after the append.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stream is not at `expected_version`
    /// - `Unavailable`: the store could not be reached
    /// - `DatabaseError`: the write failed
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> StoreFuture<'_, Version>;

    /// Load facts from a stream, oldest first.
    ///
    /// `from_version = Some(v)` skips facts before version `v` (inclusive
    /// lower bound). A stream that does not exist yields an empty vector.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    /// - `DatabaseError`: the read failed
    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> StoreFuture<'_, Vec<SerializedEvent>>;
}
