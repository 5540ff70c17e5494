//! Journal persistence, restart and outage behavior.
//!
//! A ledger reopened on the same store must come back with the same events,
//! counters, used flags and id sequences. A store that is down or too slow
//! must fail the operation with `Unavailable` and change nothing.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use chrono::Duration;
use eventchain_core::environment::Clock;
use eventchain_core::event::SerializedEvent;
use eventchain_core::event_store::EventStore;
use eventchain_ledger::{
    Capacity, Event, EventId, Identity, LedgerConfig, LedgerError, LedgerFact, Money, NewEvent,
    TicketId, TicketLedger, ValidationPolicy,
};
use eventchain_testing::{InMemoryEventStore, test_clock};
use std::sync::Arc;

async fn open(store: &InMemoryEventStore, config: &LedgerConfig) -> Result<TicketLedger, LedgerError> {
    TicketLedger::open(config, Arc::new(store.clone()), Arc::new(test_clock())).await
}

fn festival(max_tickets: i64) -> NewEvent {
    let start = test_clock().now() + Duration::days(30);
    NewEvent {
        name: "Festival".to_string(),
        description: "Two days".to_string(),
        start_time: start,
        end_time: start + Duration::days(2),
        ticket_price: 75,
        max_tickets,
        location: "Fields".to_string(),
        image_uri: "ipfs://poster".to_string(),
    }
}

#[tokio::test]
async fn test_reopen_restores_state() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default();
    let organizer = Identity::new("0xorganizer");
    let alice = Identity::new("0xalice");
    let bob = Identity::new("0xbob");

    let (event_id, used, unused) = {
        let ledger = open(&store, &config).await.unwrap();
        let event_id = ledger.create_event(&organizer, festival(3)).await.unwrap();
        let used = ledger
            .purchase_ticket(event_id, &alice, Money::from_minor(75))
            .await
            .unwrap();
        let unused = ledger.mint_ticket(event_id, &bob).await.unwrap();
        ledger.validate_ticket(used, &alice).await.unwrap();
        (event_id, used, unused)
    };

    let reopened = open(&store, &config).await.unwrap();

    assert_eq!(reopened.get_event_count().await, 1);
    let event = reopened.get_event(event_id).await.unwrap();
    assert_eq!(event.tickets_issued, 2);
    assert_eq!(event.organizer, organizer);
    assert_eq!(event.ticket_price, Money::from_minor(75));

    assert!(reopened.is_ticket_used(used).await.unwrap());
    assert!(!reopened.is_ticket_used(unused).await.unwrap());
    assert_eq!(
        reopened.get_ticket(used).await.unwrap().payment,
        Some(Money::from_minor(75))
    );
    assert_eq!(reopened.tickets_of(&bob).await.len(), 1);

    // Used flags survive a restart
    let result = reopened.validate_ticket(used, &alice).await;
    assert!(matches!(result, Err(LedgerError::AlreadyUsed(_))));
}

#[tokio::test]
async fn test_ids_continue_after_reopen() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default();
    let organizer = Identity::new("0xorganizer");
    let fan = Identity::new("0xfan");

    {
        let ledger = open(&store, &config).await.unwrap();
        let event_id = ledger.create_event(&organizer, festival(10)).await.unwrap();
        ledger.mint_ticket(event_id, &fan).await.unwrap();
        ledger.mint_ticket(event_id, &fan).await.unwrap();
    }

    let reopened = open(&store, &config).await.unwrap();
    let event_id = reopened.create_event(&organizer, festival(1)).await.unwrap();
    let ticket_id = reopened.mint_ticket(event_id, &fan).await.unwrap();

    assert_eq!(event_id, EventId::new(1));
    assert_eq!(ticket_id, TicketId::new(2));
}

#[tokio::test]
async fn test_capacity_holds_across_restart() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default();

    let event_id = {
        let ledger = open(&store, &config).await.unwrap();
        let event_id = ledger
            .create_event(&Identity::new("0xorganizer"), festival(1))
            .await
            .unwrap();
        ledger
            .mint_ticket(event_id, &Identity::new("0xfirst"))
            .await
            .unwrap();
        event_id
    };

    let reopened = open(&store, &config).await.unwrap();
    let result = reopened.mint_ticket(event_id, &Identity::new("0xsecond")).await;
    assert!(matches!(result, Err(LedgerError::SoldOut(_))));
}

#[tokio::test]
async fn test_mint_during_outage_changes_nothing() {
    let store = InMemoryEventStore::new();
    let ledger = open(&store, &LedgerConfig::default()).await.unwrap();
    let event_id = ledger
        .create_event(&Identity::new("0xorganizer"), festival(2))
        .await
        .unwrap();

    store.set_unavailable(true);
    let result = ledger.mint_ticket(event_id, &Identity::new("0xfan")).await;
    assert!(matches!(result, Err(LedgerError::Unavailable(_))));

    // Reads are served from memory during the outage
    let event = ledger.get_event(event_id).await.unwrap();
    assert_eq!(event.tickets_issued, 0);
    assert_eq!(ledger.ticket_count().await, 0);

    store.set_unavailable(false);
    let ticket_id = ledger
        .mint_ticket(event_id, &Identity::new("0xfan"))
        .await
        .unwrap();
    assert_eq!(ticket_id, TicketId::new(1), "the failed mint's id is not reused");
    assert_eq!(ledger.get_event(event_id).await.unwrap().tickets_issued, 1);
}

#[tokio::test]
async fn test_validation_during_outage_leaves_ticket_unused() {
    let store = InMemoryEventStore::new();
    let ledger = open(&store, &LedgerConfig::default()).await.unwrap();
    let fan = Identity::new("0xfan");
    let event_id = ledger
        .create_event(&Identity::new("0xorganizer"), festival(2))
        .await
        .unwrap();
    let ticket_id = ledger.mint_ticket(event_id, &fan).await.unwrap();

    store.fail_next_appends(1);
    let result = ledger.validate_ticket(ticket_id, &fan).await;
    assert!(matches!(result, Err(LedgerError::Unavailable(_))));
    assert!(!ledger.is_ticket_used(ticket_id).await.unwrap());

    ledger.validate_ticket(ticket_id, &fan).await.unwrap();
    assert!(ledger.is_ticket_used(ticket_id).await.unwrap());
}

#[tokio::test]
async fn test_slow_store_fails_fast() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default().with_store_timeout(std::time::Duration::from_millis(25));
    let ledger = open(&store, &config).await.unwrap();

    store.set_latency(Some(std::time::Duration::from_millis(500)));
    let started = std::time::Instant::now();
    let result = ledger
        .create_event(&Identity::new("0xorganizer"), festival(5))
        .await;

    assert!(matches!(result, Err(LedgerError::Unavailable(_))));
    assert!(started.elapsed() < std::time::Duration::from_millis(400));
    assert_eq!(ledger.get_event_count().await, 0);
}

/// Test: the store commits a mint but acknowledges it after the timeout.
///
/// The mint succeeds, so the slot is not handed to anyone else and the
/// journal still opens.
#[tokio::test]
async fn test_late_acknowledged_mint_keeps_its_slot() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default().with_store_timeout(std::time::Duration::from_millis(20));
    let ledger = open(&store, &config).await.unwrap();
    let event_id = ledger
        .create_event(&Identity::new("0xorganizer"), festival(1))
        .await
        .unwrap();

    store.set_ack_delay(Some(std::time::Duration::from_millis(200)));
    let first = ledger.mint_ticket(event_id, &Identity::new("0xfirst")).await;
    assert_eq!(first.unwrap(), TicketId::new(0));
    assert_eq!(ledger.get_event(event_id).await.unwrap().tickets_issued, 1);

    store.set_ack_delay(None);
    let second = ledger.mint_ticket(event_id, &Identity::new("0xsecond")).await;
    assert!(matches!(second, Err(LedgerError::SoldOut(_))));

    let reopened = open(&store, &config).await.unwrap();
    assert_eq!(reopened.get_event(event_id).await.unwrap().tickets_issued, 1);
    assert_eq!(
        reopened.get_ticket(TicketId::new(0)).await.unwrap().owner,
        Identity::new("0xfirst")
    );
}

/// Test: the store commits a validation but acknowledges it after the
/// timeout.
///
/// The ticket is used in memory and in the journal, a second scan is
/// `AlreadyUsed`, and the journal still opens.
#[tokio::test]
async fn test_late_acknowledged_validation_marks_ticket_used() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default().with_store_timeout(std::time::Duration::from_millis(20));
    let ledger = open(&store, &config).await.unwrap();
    let fan = Identity::new("0xfan");
    let event_id = ledger
        .create_event(&Identity::new("0xorganizer"), festival(1))
        .await
        .unwrap();
    let ticket_id = ledger.mint_ticket(event_id, &fan).await.unwrap();

    store.set_ack_delay(Some(std::time::Duration::from_millis(200)));
    ledger.validate_ticket(ticket_id, &fan).await.unwrap();
    assert!(ledger.is_ticket_used(ticket_id).await.unwrap());

    store.set_ack_delay(None);
    let again = ledger.validate_ticket(ticket_id, &fan).await;
    assert!(matches!(again, Err(LedgerError::AlreadyUsed(_))));

    let reopened = open(&store, &config).await.unwrap();
    assert!(reopened.is_ticket_used(ticket_id).await.unwrap());
    assert_eq!(
        store.event_types(&config.stream_id()),
        vec!["EventCreated.v1", "TicketMinted.v1", "TicketValidated.v1"]
    );
}

/// Test: a mint whose outcome could not be read back lands after its caller
/// was told it failed.
///
/// The ledger stops writing instead of handing the slot out twice, and
/// reopening picks up the mint the store kept.
#[tokio::test]
async fn test_unconfirmed_mint_stops_writes_until_reopen() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default().with_store_timeout(std::time::Duration::from_millis(100));
    let ledger = Arc::new(open(&store, &config).await.unwrap());
    let event_id = ledger
        .create_event(&Identity::new("0xorganizer"), festival(1))
        .await
        .unwrap();

    store.set_ack_delay(Some(std::time::Duration::from_millis(500)));
    let pending = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.mint_ticket(event_id, &Identity::new("0xfirst")).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    store.set_unavailable(true);

    let first = pending.await.unwrap();
    assert!(matches!(first, Err(LedgerError::Unavailable(_))));
    assert_eq!(ledger.get_event(event_id).await.unwrap().tickets_issued, 0);

    store.set_unavailable(false);
    store.set_ack_delay(None);
    let second = ledger.mint_ticket(event_id, &Identity::new("0xsecond")).await;
    assert!(matches!(second, Err(LedgerError::Unavailable(_))));
    assert_eq!(store.len(&config.stream_id()), 2);

    let reopened = open(&store, &config).await.unwrap();
    assert_eq!(reopened.get_event(event_id).await.unwrap().tickets_issued, 1);
    assert_eq!(
        reopened.get_ticket(TicketId::new(0)).await.unwrap().owner,
        Identity::new("0xfirst")
    );
    let third = reopened.mint_ticket(event_id, &Identity::new("0xthird")).await;
    assert!(matches!(third, Err(LedgerError::SoldOut(_))));
}

#[tokio::test]
async fn test_open_during_outage_is_unavailable() {
    let store = InMemoryEventStore::new();
    store.set_unavailable(true);

    let result = open(&store, &LedgerConfig::default()).await;
    assert!(matches!(result, Err(LedgerError::Unavailable(_))));
}

#[tokio::test]
async fn test_streams_are_isolated() {
    let store = InMemoryEventStore::new();
    let first = LedgerConfig {
        stream: "tenant-a".to_string(),
        ..LedgerConfig::default()
    };
    let second = LedgerConfig {
        stream: "tenant-b".to_string(),
        ..LedgerConfig::default()
    };

    let ledger = open(&store, &first).await.unwrap();
    ledger
        .create_event(&Identity::new("0xorganizer"), festival(5))
        .await
        .unwrap();

    assert_eq!(open(&store, &first).await.unwrap().get_event_count().await, 1);
    assert_eq!(open(&store, &second).await.unwrap().get_event_count().await, 0);
}

#[tokio::test]
async fn test_overbooked_journal_is_corrupted() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default().with_validation_policy(ValidationPolicy::Anyone);
    let now = test_clock().now();

    let created = LedgerFact::EventCreated {
        event: Event {
            id: EventId::new(0),
            organizer: Identity::new("0xorganizer"),
            name: "Tiny".to_string(),
            description: String::new(),
            location: String::new(),
            image_uri: String::new(),
            start_time: now,
            end_time: now + Duration::hours(1),
            ticket_price: Money::ZERO,
            max_tickets: Capacity::try_from_signed(1).unwrap(),
            tickets_issued: 0,
            created_at: now,
        },
    };
    let minted = |ticket: u64| LedgerFact::TicketMinted {
        ticket_id: TicketId::new(ticket),
        event_id: EventId::new(0),
        owner: Identity::new("0xfan"),
        payment: None,
        minted_at: now,
    };

    let facts = [created, minted(0), minted(1)]
        .iter()
        .map(|fact| SerializedEvent::from_event(fact, None).unwrap())
        .collect();
    store
        .append_events(config.stream_id(), None, facts)
        .await
        .unwrap();

    let result = open(&store, &config).await;
    assert!(matches!(result, Err(LedgerError::Corrupted { position: 2, .. })));
}

#[tokio::test]
async fn test_double_validation_in_journal_is_corrupted() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default();
    let fan = Identity::new("0xfan");

    let ticket_id = {
        let ledger = open(&store, &config).await.unwrap();
        let event_id = ledger
            .create_event(&Identity::new("0xorganizer"), festival(2))
            .await
            .unwrap();
        let ticket_id = ledger.mint_ticket(event_id, &fan).await.unwrap();
        ledger.validate_ticket(ticket_id, &fan).await.unwrap();
        ticket_id
    };

    let replayed = LedgerFact::TicketValidated {
        ticket_id,
        validated_by: fan,
        validated_at: test_clock().now(),
    };
    store
        .append_events(
            config.stream_id(),
            None,
            vec![SerializedEvent::from_event(&replayed, None).unwrap()],
        )
        .await
        .unwrap();

    let result = open(&store, &config).await;
    assert!(matches!(result, Err(LedgerError::Corrupted { position: 3, .. })));
}

#[tokio::test]
async fn test_journal_records_one_fact_per_mutation() {
    let store = InMemoryEventStore::new();
    let config = LedgerConfig::default();
    let ledger = open(&store, &config).await.unwrap();
    let fan = Identity::new("0xfan");

    let event_id = ledger
        .create_event(&Identity::new("0xorganizer"), festival(1))
        .await
        .unwrap();
    let ticket_id = ledger.mint_ticket(event_id, &fan).await.unwrap();
    ledger.validate_ticket(ticket_id, &fan).await.unwrap();

    // Rejections are not journaled
    let _ = ledger.mint_ticket(event_id, &fan).await;
    let _ = ledger.validate_ticket(ticket_id, &fan).await;

    assert_eq!(
        store.event_types(&config.stream_id()),
        vec!["EventCreated.v1", "TicketMinted.v1", "TicketValidated.v1"]
    );
}
