//! Ticket ledger: mints tickets against event slots and consumes them.
//!
//! The ledger owns ticket records and borrows capacity from the
//! [`EventRegistry`]. A mint holds its event's slot reservation for the whole
//! operation, so `tickets_issued` never exceeds `max_tickets` no matter how
//! many callers race for the last seat. A validation holds the ticket's
//! status lock from the `Unused` check through the `Used` write, so exactly
//! one of any number of concurrent validators succeeds.
//!
//! # Lock order
//!
//! Event record, then ticket table. Ticket status locks are only taken with
//! no other lock held, and the registry never calls back into the ledger.
//! The journal's own lock is innermost: it is taken under an event record or
//! a ticket status and released before anything else is locked.

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Record};
use crate::journal::{Journal, LedgerFact};
use crate::registry::EventRegistry;
use crate::types::{
    Event, EventDetails, EventId, Identity, Money, NewEvent, Ticket, TicketId, TicketStatus,
    ValidationPolicy,
};
use chrono::{DateTime, Utc};
use eventchain_core::environment::Clock;
use eventchain_core::event_store::EventStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A ticket record. Everything but the status is immutable after mint.
struct TicketEntry {
    id: TicketId,
    event_id: EventId,
    owner: Identity,
    payment: Option<Money>,
    minted_at: DateTime<Utc>,
    status: RwLock<TicketStatus>,
}

impl TicketEntry {
    async fn snapshot(&self) -> Ticket {
        Ticket {
            id: self.id,
            event_id: self.event_id,
            owner: self.owner.clone(),
            payment: self.payment,
            minted_at: self.minted_at,
            status: self.status.read().await.clone(),
        }
    }
}

/// The ticket ledger.
///
/// Safe to share across tasks behind an `Arc`; every operation takes `&self`.
pub struct TicketLedger {
    registry: Arc<EventRegistry>,
    tickets: RwLock<HashMap<TicketId, Arc<TicketEntry>>>,
    next_ticket_id: AtomicU64,
    journal: Journal,
    clock: Arc<dyn Clock>,
    policy: ValidationPolicy,
}

impl TicketLedger {
    /// Open a ledger on `store`, replaying whatever the journal already holds.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unavailable`] if the journal cannot be read
    /// - [`LedgerError::Codec`] if a stored fact cannot be decoded
    /// - [`LedgerError::Corrupted`] if the facts contradict each other
    pub async fn open(
        config: &LedgerConfig,
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let journal = Journal::new(store, config.stream_id(), config.store_timeout());
        let registry = Arc::new(EventRegistry::new(journal.clone(), Arc::clone(&clock)));
        let ledger = Self::with_registry(registry, journal, clock, config.validation_policy);

        let facts = ledger.journal.replay().await?;
        let count = facts.len();
        for (position, fact) in facts.into_iter().enumerate() {
            ledger
                .restore(fact)
                .await
                .map_err(|reason| LedgerError::Corrupted { position, reason })
                .inspect_err(|e| tracing::error!(error = %e, "Journal replay failed"))?;
        }

        tracing::info!(
            stream = %ledger.journal.stream(),
            facts = count,
            policy = %ledger.policy,
            "Ticket ledger opened"
        );
        Ok(ledger)
    }

    /// Empty ledger over an existing registry. Nothing is replayed.
    #[must_use]
    pub fn with_registry(
        registry: Arc<EventRegistry>,
        journal: Journal,
        clock: Arc<dyn Clock>,
        policy: ValidationPolicy,
    ) -> Self {
        Self {
            registry,
            tickets: RwLock::new(HashMap::new()),
            next_ticket_id: AtomicU64::new(0),
            journal,
            clock,
            policy,
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// See [`EventRegistry::create_event`].
    ///
    /// # Errors
    ///
    /// See [`EventRegistry::create_event`].
    pub async fn create_event(
        &self,
        organizer: &Identity,
        new_event: NewEvent,
    ) -> Result<EventId, LedgerError> {
        self.registry.create_event(organizer, new_event).await
    }

    /// See [`EventRegistry::get_event`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id.
    pub async fn get_event(&self, id: EventId) -> Result<Event, LedgerError> {
        self.registry.get_event(id).await
    }

    /// See [`EventRegistry::get_event_details`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id.
    pub async fn get_event_details(&self, id: EventId) -> Result<EventDetails, LedgerError> {
        self.registry.get_event_details(id).await
    }

    /// Number of events ever created.
    pub async fn get_event_count(&self) -> u64 {
        self.registry.get_event_count().await
    }

    /// Every event in id order.
    pub async fn list_events(&self) -> Vec<EventDetails> {
        self.registry.list_events().await
    }

    // ========================================================================
    // Minting
    // ========================================================================

    /// Mint a ticket for `requester`.
    ///
    /// Payment, if any, is the caller layer's concern.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] for an unknown event
    /// - [`LedgerError::SoldOut`] when every slot is taken
    /// - [`LedgerError::Unavailable`] if the journal cannot be written;
    ///   the slot is released and no ticket exists. A mint the store
    ///   committed despite failing to acknowledge it succeeds.
    pub async fn mint_ticket(
        &self,
        event_id: EventId,
        requester: &Identity,
    ) -> Result<TicketId, LedgerError> {
        self.mint(event_id, requester, None).await
    }

    /// Mint a ticket against an attached payment.
    ///
    /// The payment must cover the ticket price. Overpayment is accepted and
    /// recorded as offered.
    ///
    /// # Errors
    ///
    /// As [`mint_ticket`](Self::mint_ticket), plus
    /// [`LedgerError::InsufficientPayment`] when `payment` is below the price.
    pub async fn purchase_ticket(
        &self,
        event_id: EventId,
        requester: &Identity,
        payment: Money,
    ) -> Result<TicketId, LedgerError> {
        self.mint(event_id, requester, Some(payment)).await
    }

    async fn mint(
        &self,
        event_id: EventId,
        requester: &Identity,
        payment: Option<Money>,
    ) -> Result<TicketId, LedgerError> {
        self.try_mint(event_id, requester, payment)
            .await
            .inspect(|ticket_id| {
                metrics::counter!("eventchain_tickets_minted_total").increment(1);
                tracing::info!(
                    event_id = %event_id,
                    ticket_id = %ticket_id,
                    owner = %requester,
                    "Ticket minted"
                );
            })
            .inspect_err(|e| {
                metrics::counter!("eventchain_mints_rejected_total", "reason" => e.kind()).increment(1);
                tracing::debug!(event_id = %event_id, requester = %requester, error = %e, "Mint rejected");
            })
    }

    async fn try_mint(
        &self,
        event_id: EventId,
        requester: &Identity,
        payment: Option<Money>,
    ) -> Result<TicketId, LedgerError> {
        let reservation = self
            .registry
            .try_reserve_slot(event_id)
            .await?
            .ok_or(LedgerError::SoldOut(event_id))?;

        if let Some(offered) = payment {
            let required = reservation.ticket_price;
            if offered < required {
                return Err(LedgerError::InsufficientPayment {
                    event_id,
                    required,
                    offered,
                });
            }
        }

        let ticket_id = TicketId::new(self.next_ticket_id.fetch_add(1, Ordering::SeqCst));
        let minted_at = self.clock.now();

        let fact = LedgerFact::TicketMinted {
            ticket_id,
            event_id,
            owner: requester.clone(),
            payment,
            minted_at,
        };
        if let Err(e) = self.journal.record(&fact).await {
            tracing::warn!(
                event_id = %event_id,
                ticket_id = %ticket_id,
                error = %e,
                "Mint not journaled, releasing slot"
            );
            reservation.release();
            return Err(e);
        }

        let entry = TicketEntry {
            id: ticket_id,
            event_id,
            owner: requester.clone(),
            payment,
            minted_at,
            status: RwLock::new(TicketStatus::Unused),
        };
        self.tickets.write().await.insert(ticket_id, Arc::new(entry));
        reservation.commit();

        Ok(ticket_id)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Consume a ticket.
    ///
    /// Checks run in order: the ticket exists, it is unused, and the
    /// validation policy admits `validator`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] for an unknown ticket
    /// - [`LedgerError::AlreadyUsed`] if the ticket was validated before
    /// - [`LedgerError::Unauthorized`] if the policy rejects `validator`
    /// - [`LedgerError::Unavailable`] if the journal cannot be written;
    ///   the ticket stays unused
    pub async fn validate_ticket(
        &self,
        ticket_id: TicketId,
        validator: &Identity,
    ) -> Result<(), LedgerError> {
        self.try_validate(ticket_id, validator)
            .await
            .inspect(|_| {
                metrics::counter!("eventchain_tickets_validated_total").increment(1);
                tracing::info!(ticket_id = %ticket_id, validator = %validator, "Ticket validated");
            })
            .inspect_err(|e| {
                metrics::counter!("eventchain_validations_rejected_total", "reason" => e.kind())
                    .increment(1);
                tracing::debug!(ticket_id = %ticket_id, validator = %validator, error = %e, "Validation rejected");
            })
    }

    async fn try_validate(&self, ticket_id: TicketId, validator: &Identity) -> Result<(), LedgerError> {
        let entry = self.entry(ticket_id).await?;
        let organizer = self.registry.organizer_of(entry.event_id).await?;

        let mut status = entry.status.write().await;
        if status.is_used() {
            return Err(LedgerError::AlreadyUsed(ticket_id));
        }
        if !self.policy.permits(validator, &entry.owner, &organizer) {
            return Err(LedgerError::Unauthorized {
                ticket_id,
                validator: validator.clone(),
                policy: self.policy,
            });
        }

        let validated_at = self.clock.now();
        self.journal
            .record(&LedgerFact::TicketValidated {
                ticket_id,
                validated_by: validator.clone(),
                validated_at,
            })
            .await?;

        *status = TicketStatus::Used {
            validated_at,
            validated_by: validator.clone(),
        };
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether a ticket has been validated.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown ticket.
    pub async fn is_ticket_used(&self, ticket_id: TicketId) -> Result<bool, LedgerError> {
        let entry = self.entry(ticket_id).await?;
        let used = entry.status.read().await.is_used();
        Ok(used)
    }

    /// Snapshot of a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown ticket.
    pub async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket, LedgerError> {
        let entry = self.entry(ticket_id).await?;
        Ok(entry.snapshot().await)
    }

    /// Every ticket held by `owner`, in id order.
    pub async fn tickets_of(&self, owner: &Identity) -> Vec<Ticket> {
        let mut entries: Vec<Arc<TicketEntry>> = self
            .tickets
            .read()
            .await
            .values()
            .filter(|entry| &entry.owner == owner)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.id);

        let mut tickets = Vec::with_capacity(entries.len());
        for entry in entries {
            tickets.push(entry.snapshot().await);
        }
        tickets
    }

    /// Number of tickets ever minted.
    pub async fn ticket_count(&self) -> usize {
        self.tickets.read().await.len()
    }

    async fn entry(&self, ticket_id: TicketId) -> Result<Arc<TicketEntry>, LedgerError> {
        self.tickets
            .read()
            .await
            .get(&ticket_id)
            .cloned()
            .ok_or(LedgerError::NotFound(Record::Ticket(ticket_id)))
    }

    // ========================================================================
    // Replay
    // ========================================================================

    async fn restore(&self, fact: LedgerFact) -> Result<(), String> {
        match fact {
            LedgerFact::EventCreated { event } => self.registry.restore_event(event).await,
            LedgerFact::TicketMinted {
                ticket_id,
                event_id,
                owner,
                payment,
                minted_at,
            } => {
                if self.tickets.read().await.contains_key(&ticket_id) {
                    return Err(format!("ticket {ticket_id} minted twice"));
                }
                self.registry.restore_mint(event_id).await?;

                self.tickets.write().await.insert(
                    ticket_id,
                    Arc::new(TicketEntry {
                        id: ticket_id,
                        event_id,
                        owner,
                        payment,
                        minted_at,
                        status: RwLock::new(TicketStatus::Unused),
                    }),
                );
                self.next_ticket_id
                    .fetch_max(ticket_id.value().saturating_add(1), Ordering::SeqCst);
                Ok(())
            }
            LedgerFact::TicketValidated {
                ticket_id,
                validated_by,
                validated_at,
            } => {
                let entry = self
                    .entry(ticket_id)
                    .await
                    .map_err(|_| format!("unknown ticket {ticket_id} validated"))?;

                let mut status = entry.status.write().await;
                if status.is_used() {
                    return Err(format!("ticket {ticket_id} validated twice"));
                }
                *status = TicketStatus::Used {
                    validated_at,
                    validated_by,
                };
                Ok(())
            }
        }
    }
}

impl fmt::Debug for TicketLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketLedger")
            .field("registry", &self.registry)
            .field("next_ticket_id", &self.next_ticket_id.load(Ordering::SeqCst))
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use eventchain_testing::{InMemoryEventStore, test_clock};

    async fn open(store: &InMemoryEventStore, policy: ValidationPolicy) -> TicketLedger {
        let config = LedgerConfig::default().with_validation_policy(policy);
        TicketLedger::open(&config, Arc::new(store.clone()), Arc::new(test_clock()))
            .await
            .unwrap()
    }

    fn gig(max_tickets: i64, ticket_price: i64) -> NewEvent {
        let start = test_clock().now() + Duration::days(1);
        NewEvent {
            name: "Gig".to_string(),
            description: String::new(),
            start_time: start,
            end_time: start + Duration::hours(2),
            ticket_price,
            max_tickets,
            location: "Club".to_string(),
            image_uri: String::new(),
        }
    }

    #[tokio::test]
    async fn mint_then_validate() {
        let store = InMemoryEventStore::new();
        let ledger = open(&store, ValidationPolicy::OwnerOnly).await;
        let organizer = Identity::new("0xorganizer");
        let fan = Identity::new("0xfan");

        let event_id = ledger.create_event(&organizer, gig(2, 0)).await.unwrap();
        let ticket_id = ledger.mint_ticket(event_id, &fan).await.unwrap();

        assert_eq!(ticket_id, TicketId::new(0));
        assert!(!ledger.is_ticket_used(ticket_id).await.unwrap());

        ledger.validate_ticket(ticket_id, &fan).await.unwrap();
        assert!(ledger.is_ticket_used(ticket_id).await.unwrap());

        let ticket = ledger.get_ticket(ticket_id).await.unwrap();
        assert!(matches!(ticket.status, TicketStatus::Used { validated_by, .. } if validated_by == fan));
    }

    #[tokio::test]
    async fn already_used_wins_over_unauthorized() {
        let store = InMemoryEventStore::new();
        let ledger = open(&store, ValidationPolicy::OwnerOnly).await;
        let fan = Identity::new("0xfan");

        let event_id = ledger
            .create_event(&Identity::new("0xorganizer"), gig(1, 0))
            .await
            .unwrap();
        let ticket_id = ledger.mint_ticket(event_id, &fan).await.unwrap();
        ledger.validate_ticket(ticket_id, &fan).await.unwrap();

        let result = ledger.validate_ticket(ticket_id, &Identity::new("0xstranger")).await;
        assert!(matches!(result, Err(LedgerError::AlreadyUsed(id)) if id == ticket_id));
    }

    #[tokio::test]
    async fn insufficient_payment_releases_slot() {
        let store = InMemoryEventStore::new();
        let ledger = open(&store, ValidationPolicy::OwnerOnly).await;
        let event_id = ledger
            .create_event(&Identity::new("0xorganizer"), gig(1, 100))
            .await
            .unwrap();

        let result = ledger
            .purchase_ticket(event_id, &Identity::new("0xfan"), Money::from_minor(99))
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientPayment { required, offered, .. })
                if required.minor() == 100 && offered.minor() == 99
        ));
        assert_eq!(ledger.get_event(event_id).await.unwrap().tickets_issued, 0);

        let ticket_id = ledger
            .purchase_ticket(event_id, &Identity::new("0xfan"), Money::from_minor(120))
            .await
            .unwrap();
        let ticket = ledger.get_ticket(ticket_id).await.unwrap();
        assert_eq!(ticket.payment, Some(Money::from_minor(120)));
    }

    #[tokio::test]
    async fn failed_mint_journal_releases_slot() {
        let store = InMemoryEventStore::new();
        let ledger = open(&store, ValidationPolicy::OwnerOnly).await;
        let event_id = ledger
            .create_event(&Identity::new("0xorganizer"), gig(1, 0))
            .await
            .unwrap();

        store.fail_next_appends(1);
        let result = ledger.mint_ticket(event_id, &Identity::new("0xfan")).await;
        assert!(matches!(result, Err(LedgerError::Unavailable(_))));
        assert_eq!(ledger.get_event(event_id).await.unwrap().tickets_issued, 0);
        assert_eq!(ledger.ticket_count().await, 0);

        ledger.mint_ticket(event_id, &Identity::new("0xfan")).await.unwrap();
        assert_eq!(ledger.get_event(event_id).await.unwrap().tickets_issued, 1);
    }
}
