//! Event registry: creates events, answers queries, and hands out ticket slots.
//!
//! Events live in an append-only table indexed by [`EventId`]. Each record
//! sits behind its own lock, so minting against different events never
//! contends. Creations are serialized among themselves while they wait on the
//! journal; the table lock is only write-held for the final push.
//!
//! # Slot reservation
//!
//! [`EventRegistry::try_reserve_slot`] is the single place that moves
//! `tickets_issued`. It returns a [`SlotReservation`] that keeps the event's
//! write lock until the mint either commits or gives the slot back. Dropping
//! an uncommitted reservation releases the slot, so every exit path of a
//! failed mint restores the counter.

use crate::error::{LedgerError, Record};
use crate::journal::{Journal, LedgerFact};
use crate::types::{Capacity, Event, EventDetails, EventId, Identity, Money, NewEvent};
use eventchain_core::environment::Clock;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};

type EventRecord = Arc<RwLock<Event>>;

/// Registry of all events.
pub struct EventRegistry {
    events: RwLock<Vec<EventRecord>>,
    creating: Mutex<()>,
    journal: Journal,
    clock: Arc<dyn Clock>,
}

impl EventRegistry {
    /// Empty registry journaling to `journal`.
    #[must_use]
    pub fn new(journal: Journal, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            creating: Mutex::new(()),
            journal,
            clock,
        }
    }

    /// Create an event owned by `organizer`.
    ///
    /// Ids are assigned sequentially from 0 in creation order.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidRange`] if `start_time >= end_time`
    /// - [`LedgerError::InvalidCapacity`] if `max_tickets` is not in `1..=u32::MAX`
    /// - [`LedgerError::InvalidPrice`] if `ticket_price` is negative
    /// - [`LedgerError::Unavailable`] if the journal cannot be written;
    ///   the event count is unchanged
    pub async fn create_event(
        &self,
        organizer: &Identity,
        new_event: NewEvent,
    ) -> Result<EventId, LedgerError> {
        let (ticket_price, max_tickets) = validate_new_event(&new_event).inspect_err(|e| {
            metrics::counter!("eventchain_events_rejected_total", "reason" => e.kind()).increment(1);
        })?;

        // Held across the journal write so ids follow journal order.
        let creating = self.creating.lock().await;
        let id = EventId::new(self.events.read().await.len() as u64);

        let event = Event {
            id,
            organizer: organizer.clone(),
            name: new_event.name,
            description: new_event.description,
            location: new_event.location,
            image_uri: new_event.image_uri,
            start_time: new_event.start_time,
            end_time: new_event.end_time,
            ticket_price,
            max_tickets,
            tickets_issued: 0,
            created_at: self.clock.now(),
        };

        self.journal
            .record(&LedgerFact::EventCreated {
                event: event.clone(),
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(organizer = %organizer, error = %e, "Event creation not journaled");
            })?;

        self.events.write().await.push(Arc::new(RwLock::new(event)));
        drop(creating);

        metrics::counter!("eventchain_events_created_total").increment(1);
        tracing::info!(
            event_id = %id,
            organizer = %organizer,
            max_tickets = max_tickets.value(),
            ticket_price = ticket_price.minor(),
            "Event created"
        );

        Ok(id)
    }

    /// Snapshot of an event.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id.
    pub async fn get_event(&self, id: EventId) -> Result<Event, LedgerError> {
        let record = self.record(id).await?;
        let event = record.read().await.clone();
        Ok(event)
    }

    /// Snapshot of an event with its remaining availability.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id.
    pub async fn get_event_details(&self, id: EventId) -> Result<EventDetails, LedgerError> {
        self.get_event(id).await.map(EventDetails::from)
    }

    /// Number of events ever created.
    pub async fn get_event_count(&self) -> u64 {
        self.events.read().await.len() as u64
    }

    /// Every event in id order.
    pub async fn list_events(&self) -> Vec<EventDetails> {
        let records: Vec<EventRecord> = self.events.read().await.clone();

        let mut details = Vec::with_capacity(records.len());
        for record in records {
            details.push(EventDetails::from(record.read().await.clone()));
        }
        details
    }

    /// Organizer of an event.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id.
    pub async fn organizer_of(&self, id: EventId) -> Result<Identity, LedgerError> {
        let record = self.record(id).await?;
        let organizer = record.read().await.organizer.clone();
        Ok(organizer)
    }

    /// Claim one ticket slot.
    ///
    /// Returns `Ok(None)` when the event is sold out. On success the slot is
    /// already counted in `tickets_issued` and the event stays write-locked
    /// until the reservation is committed or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown id.
    pub async fn try_reserve_slot(&self, id: EventId) -> Result<Option<SlotReservation>, LedgerError> {
        let record = self.record(id).await?;
        let mut guard = record.write_owned().await;

        if guard.is_sold_out() {
            return Ok(None);
        }

        guard.tickets_issued += 1;
        Ok(Some(SlotReservation {
            guard,
            committed: false,
        }))
    }

    /// Rebuild an event from a journaled `EventCreated` fact.
    pub(crate) async fn restore_event(&self, event: Event) -> Result<(), String> {
        let mut events = self.events.write().await;
        let expected = events.len() as u64;

        if event.id.value() != expected {
            return Err(format!("event id {} out of sequence, expected {expected}", event.id));
        }
        if event.tickets_issued != 0 {
            return Err(format!("event {} created with tickets already issued", event.id));
        }

        events.push(Arc::new(RwLock::new(event)));
        Ok(())
    }

    /// Re-apply a journaled mint to its event's counter.
    pub(crate) async fn restore_mint(&self, id: EventId) -> Result<(), String> {
        match self.try_reserve_slot(id).await {
            Ok(Some(reservation)) => {
                reservation.commit();
                Ok(())
            }
            Ok(None) => Err(format!("ticket minted for sold-out event {id}")),
            Err(_) => Err(format!("ticket minted for unknown event {id}")),
        }
    }

    async fn record(&self, id: EventId) -> Result<EventRecord, LedgerError> {
        let events = self.events.read().await;
        usize::try_from(id.value())
            .ok()
            .and_then(|index| events.get(index))
            .cloned()
            .ok_or(LedgerError::NotFound(Record::Event(id)))
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

/// A claimed ticket slot.
///
/// Holds the event's write lock. [`commit`](Self::commit) keeps the slot;
/// [`release`](Self::release) or dropping the reservation gives it back.
#[must_use = "dropping a reservation releases the slot"]
pub struct SlotReservation {
    guard: OwnedRwLockWriteGuard<Event>,
    committed: bool,
}

impl SlotReservation {
    /// Keep the slot and unlock the event.
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Give the slot back and unlock the event.
    pub fn release(self) {}
}

impl Deref for SlotReservation {
    type Target = Event;

    fn deref(&self) -> &Event {
        &self.guard
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.tickets_issued = self.guard.tickets_issued.saturating_sub(1);
            tracing::debug!(event_id = %self.guard.id, "Ticket slot released");
        }
    }
}

impl fmt::Debug for SlotReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotReservation")
            .field("event_id", &self.guard.id)
            .field("tickets_issued", &self.guard.tickets_issued)
            .field("committed", &self.committed)
            .finish()
    }
}

/// Check creation input, returning the typed price and capacity.
///
/// Range is checked first, then capacity, then price.
fn validate_new_event(new_event: &NewEvent) -> Result<(Money, Capacity), LedgerError> {
    if new_event.start_time >= new_event.end_time {
        return Err(LedgerError::InvalidRange {
            start: new_event.start_time,
            end: new_event.end_time,
        });
    }

    let max_tickets = Capacity::try_from_signed(new_event.max_tickets)
        .ok_or(LedgerError::InvalidCapacity(new_event.max_tickets))?;

    let ticket_price = Money::try_from_signed(new_event.ticket_price)
        .ok_or(LedgerError::InvalidPrice(new_event.ticket_price))?;

    Ok((ticket_price, max_tickets))
}
