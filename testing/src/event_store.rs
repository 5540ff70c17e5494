//! In-memory event store for fast, deterministic ledger tests.
//!
//! Clones share the same underlying streams, so a test can drop a ledger and
//! reopen a new one on a clone of the same store to simulate a restart.
//!
//! The store can also misbehave on purpose:
//! - [`InMemoryEventStore::set_unavailable`]: every call fails with `Unavailable`
//! - [`InMemoryEventStore::fail_next_appends`]: the next `n` appends fail
//! - [`InMemoryEventStore::set_latency`]: every call sleeps before answering
//! - [`InMemoryEventStore::set_ack_delay`]: appends commit, then sleep before
//!   answering

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use eventchain_core::event::SerializedEvent;
use eventchain_core::event_store::{EventStore, EventStoreError, StoreFuture};
use eventchain_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Shared state behind every clone of an [`InMemoryEventStore`].
#[derive(Debug, Default)]
struct Inner {
    streams: RwLock<HashMap<StreamId, Vec<SerializedEvent>>>,
    unavailable: AtomicBool,
    failing_appends: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    ack_delay: Mutex<Option<Duration>>,
}

/// `HashMap`-backed [`EventStore`] with fault injection.
///
/// # Example
///
/// ```
/// use eventchain_testing::InMemoryEventStore;
/// use eventchain_core::event_store::EventStore;
/// use eventchain_core::event::SerializedEvent;
/// use eventchain_core::stream::{StreamId, Version};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let stream = StreamId::new("ledger");
///
/// let fact = SerializedEvent::new("TicketMinted.v1".to_string(), vec![1], None);
/// let version = store.append_events(stream.clone(), None, vec![fact]).await?;
/// assert_eq!(version, Version::new(1));
///
/// store.set_unavailable(true);
/// assert!(store.load_events(stream, None).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

impl InMemoryEventStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (`true`) or succeed again (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` appends with `Unavailable`; loads are unaffected.
    pub fn fail_next_appends(&self, count: usize) {
        self.inner.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency` (`None` removes the delay).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock().unwrap() = latency;
    }

    /// Commit every append, then wait `delay` before acknowledging it
    /// (`None` removes the delay).
    ///
    /// A caller that gives up while waiting has still written its facts.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        *self.inner.ack_delay.lock().unwrap() = delay;
    }

    /// Number of facts stored in `stream_id`.
    #[must_use]
    pub fn len(&self, stream_id: &StreamId) -> usize {
        self.inner
            .streams
            .read()
            .unwrap()
            .get(stream_id)
            .map_or(0, Vec::len)
    }

    /// True if `stream_id` holds no facts.
    #[must_use]
    pub fn is_empty(&self, stream_id: &StreamId) -> bool {
        self.len(stream_id) == 0
    }

    /// Type names of every fact in `stream_id`, oldest first.
    #[must_use]
    pub fn event_types(&self, stream_id: &StreamId) -> Vec<String> {
        self.inner
            .streams
            .read()
            .unwrap()
            .get(stream_id)
            .map(|events| events.iter().map(|e| e.event_type.clone()).collect())
            .unwrap_or_default()
    }

    async fn simulate_network(&self) -> Result<(), EventStoreError> {
        let latency = *self.inner.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn take_append_failure(&self) -> bool {
        self.inner
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            self.simulate_network().await?;
            if self.take_append_failure() {
                return Err(EventStoreError::Unavailable(
                    "injected append failure".to_string(),
                ));
            }

            let version = {
                let mut streams = self.inner.streams.write().unwrap();
                let stream = streams.entry(stream_id.clone()).or_default();
                let actual = Version::new(stream.len() as u64);

                if let Some(expected) = expected_version {
                    if expected != actual {
                        return Err(EventStoreError::ConcurrencyConflict {
                            stream_id,
                            expected,
                            actual,
                        });
                    }
                }

                let appended = events.len() as u64;
                stream.extend(events);
                actual.advance(appended)
            };

            let ack_delay = *self.inner.ack_delay.lock().unwrap();
            if let Some(delay) = ack_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(version)
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> StoreFuture<'_, Vec<SerializedEvent>> {
        Box::pin(async move {
            self.simulate_network().await?;

            let streams = self.inner.streams.read().unwrap();
            let Some(stream) = streams.get(&stream_id) else {
                return Ok(Vec::new());
            };

            // Fact versions start at 1, so version v lives at index v - 1.
            let skip = from_version
                .map_or(0, |v| usize::try_from(v.value().saturating_sub(1)).unwrap_or(usize::MAX));
            Ok(stream.iter().skip(skip).cloned().collect())
        })
    }
}
