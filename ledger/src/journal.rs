//! The ledger journal: an append-only stream of committed facts.
//!
//! Every successful mutation is recorded here before it becomes visible in
//! memory, and opening a ledger replays the stream to rebuild state. All
//! store calls are bounded by a timeout so an unreachable store fails fast
//! with [`LedgerError::Unavailable`] instead of hanging the caller.
//!
//! A timed-out append is not assumed lost: the journal reads the stream back
//! and reports the fact as recorded if it landed, so callers only undo work
//! the store really does not hold.

use crate::error::LedgerError;
use crate::types::{Event, EventId, Identity, Money, TicketId};
use chrono::{DateTime, Utc};
use eventchain_core::event::{Event as Fact, SerializedEvent};
use eventchain_core::event_store::{EventStore, EventStoreError};
use eventchain_core::stream::{StreamId, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Something the ledger committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerFact {
    /// An event was created. `tickets_issued` is always 0 here.
    EventCreated {
        /// The event as created
        event: Event,
    },
    /// A ticket was minted against an event slot.
    TicketMinted {
        /// New ticket
        ticket_id: TicketId,
        /// Event whose slot it took
        event_id: EventId,
        /// Minting identity
        owner: Identity,
        /// Payment attached to the mint
        payment: Option<Money>,
        /// Mint time
        minted_at: DateTime<Utc>,
    },
    /// A ticket was consumed.
    TicketValidated {
        /// Consumed ticket
        ticket_id: TicketId,
        /// Validating identity
        validated_by: Identity,
        /// Validation time
        validated_at: DateTime<Utc>,
    },
}

impl LedgerFact {
    /// The identity that caused this fact.
    #[must_use]
    pub const fn actor(&self) -> &Identity {
        match self {
            Self::EventCreated { event } => &event.organizer,
            Self::TicketMinted { owner, .. } => owner,
            Self::TicketValidated { validated_by, .. } => validated_by,
        }
    }
}

impl Fact for LedgerFact {
    fn event_type(&self) -> &'static str {
        match self {
            Self::EventCreated { .. } => "EventCreated.v1",
            Self::TicketMinted { .. } => "TicketMinted.v1",
            Self::TicketValidated { .. } => "TicketValidated.v1",
        }
    }
}

/// What the journal knows about its stream.
#[derive(Debug, Default)]
struct Head {
    /// Facts this process has applied.
    version: Version,
    /// A fact whose append neither succeeded nor failed conclusively.
    unconfirmed: Option<SerializedEvent>,
    /// Set once the stream holds facts this process did not apply.
    diverged: bool,
}

/// Handle on the journal stream.
///
/// Appends are serialized and carry the expected stream version, so a fact
/// written behind the ledger's back (another writer, or an append that
/// committed after its caller gave up) is detected on the next append
/// instead of silently interleaving with live state. A journal that has
/// detected this refuses further appends until the ledger is reopened.
#[derive(Clone)]
pub struct Journal {
    store: Arc<dyn EventStore>,
    stream: StreamId,
    timeout: Duration,
    head: Arc<Mutex<Head>>,
}

impl Journal {
    /// Journal `stream` in `store`, bounding every call by `timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, stream: StreamId, timeout: Duration) -> Self {
        Self {
            store,
            stream,
            timeout,
            head: Arc::new(Mutex::new(Head::default())),
        }
    }

    /// The stream this journal appends to.
    #[must_use]
    pub const fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Durably record one fact.
    ///
    /// When the store fails or times out, the stream is read back before
    /// answering: a fact that landed anyway is reported as recorded. If even
    /// that read fails the outcome stays unconfirmed and is resolved before
    /// the next append.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Codec`] if the fact cannot be encoded
    /// - [`LedgerError::Unavailable`] if the store fails or times out and
    ///   the fact is not in the stream, or if the stream has diverged from
    ///   what this journal applied
    pub async fn record(&self, fact: &LedgerFact) -> Result<Version, LedgerError> {
        let metadata = serde_json::json!({ "actor": fact.actor().as_str() });
        let serialized = SerializedEvent::from_event(fact, Some(metadata))?;

        let mut head = self.head.lock().await;
        if self.settle(&mut head).await? {
            // Its caller already saw a failure
            return Err(self.diverge(&mut head, "an unconfirmed append landed late"));
        }

        let expected = head.version;
        let append = self
            .store
            .append_events(self.stream.clone(), Some(expected), vec![serialized.clone()]);

        let failure = match tokio::time::timeout(self.timeout, append).await {
            Ok(Ok(version)) => {
                head.version = version;
                return Ok(self.recorded(fact, version));
            }
            Ok(Err(EventStoreError::ConcurrencyConflict { actual, .. })) => {
                return Err(self.diverge(&mut head, &format!("stream at {actual}, expected {expected}")));
            }
            Ok(Err(error)) => LedgerError::from(error),
            Err(_) => self.timed_out("append"),
        };

        head.unconfirmed = Some(serialized);
        match self.settle(&mut head).await {
            Ok(true) => {
                tracing::info!(
                    stream = %self.stream,
                    error = %failure,
                    "Append confirmed by reading the stream back"
                );
                Ok(self.recorded(fact, head.version))
            }
            Ok(false) => Err(failure),
            Err(error) if head.diverged => Err(error),
            Err(error) => {
                tracing::warn!(stream = %self.stream, error = %error, "Append outcome unconfirmed");
                Err(failure)
            }
        }
    }

    /// Load every fact in stream order.
    ///
    /// The journal's expected version restarts from what was loaded.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unavailable`] if the store fails or times out
    /// - [`LedgerError::Codec`] if a stored fact cannot be decoded
    pub async fn replay(&self) -> Result<Vec<LedgerFact>, LedgerError> {
        let mut head = self.head.lock().await;
        let serialized = self.load_from(None).await?;

        let facts = serialized
            .iter()
            .map(|event| LedgerFact::from_serialized(event).map_err(LedgerError::from))
            .collect::<Result<Vec<_>, _>>()?;

        *head = Head {
            version: Version::new(serialized.len() as u64),
            ..Head::default()
        };
        Ok(facts)
    }

    /// Resolve an unconfirmed append by reading past the applied version.
    ///
    /// Returns whether the unconfirmed fact is in the stream.
    async fn settle(&self, head: &mut Head) -> Result<bool, LedgerError> {
        if head.diverged {
            return Err(self.diverged_error());
        }
        let Some(pending) = head.unconfirmed.take() else {
            return Ok(false);
        };

        let tail = match self.load_from(Some(head.version.next())).await {
            Ok(tail) => tail,
            Err(error) => {
                head.unconfirmed = Some(pending);
                return Err(error);
            }
        };

        match tail.as_slice() {
            [] => Ok(false),
            [landed] if *landed == pending => {
                head.version = head.version.next();
                Ok(true)
            }
            _ => Err(self.diverge(head, &format!("{} unexpected facts past the applied version", tail.len()))),
        }
    }

    async fn load_from(&self, from: Option<Version>) -> Result<Vec<SerializedEvent>, LedgerError> {
        let load = self.store.load_events(self.stream.clone(), from);

        let loaded = tokio::time::timeout(self.timeout, load)
            .await
            .map_err(|_| self.timed_out("load"))??;
        Ok(loaded)
    }

    fn recorded(&self, fact: &LedgerFact, version: Version) -> Version {
        tracing::debug!(
            stream = %self.stream,
            version = %version,
            fact = fact.event_type(),
            "Recorded ledger fact"
        );
        version
    }

    fn diverge(&self, head: &mut Head, reason: &str) -> LedgerError {
        head.diverged = true;
        metrics::counter!("eventchain_journal_diverged_total").increment(1);
        tracing::error!(
            stream = %self.stream,
            version = %head.version,
            reason,
            "Journal diverged from ledger state"
        );
        self.diverged_error()
    }

    fn diverged_error(&self) -> LedgerError {
        LedgerError::Unavailable(format!(
            "stream {} holds facts this ledger has not applied; reopen the ledger",
            self.stream
        ))
    }

    fn timed_out(&self, operation: &str) -> LedgerError {
        tracing::warn!(
            stream = %self.stream,
            timeout = ?self.timeout,
            operation,
            "Journal store did not answer in time"
        );
        LedgerError::Unavailable(format!(
            "{operation} on stream {} timed out after {:?}",
            self.stream, self.timeout
        ))
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("stream", &self.stream)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
