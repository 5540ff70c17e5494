//! Ledger metrics.
//!
//! Counters are recorded through the `metrics` facade; installing an exporter
//! is left to the host process.
//!
//! # Exported Metrics
//!
//! - `eventchain_events_created_total` - Events created
//! - `eventchain_events_rejected_total{reason}` - Event creations rejected
//! - `eventchain_tickets_minted_total` - Tickets minted
//! - `eventchain_mints_rejected_total{reason}` - Mints rejected (`sold_out`, `not_found`, ...)
//! - `eventchain_tickets_validated_total` - Tickets consumed
//! - `eventchain_validations_rejected_total{reason}` - Validations rejected
//! - `eventchain_store_appended_total` - Facts appended by the `PostgreSQL` store

use metrics::describe_counter;

/// Register descriptions for every ledger metric.
///
/// Call once at startup, before any metric is recorded.
pub fn register_ledger_metrics() {
    describe_counter!("eventchain_events_created_total", "Total number of events created");
    describe_counter!(
        "eventchain_events_rejected_total",
        "Event creations rejected, by reason (invalid_range, invalid_capacity, invalid_price)"
    );

    describe_counter!("eventchain_tickets_minted_total", "Total number of tickets minted");
    describe_counter!(
        "eventchain_mints_rejected_total",
        "Mints rejected, by reason (sold_out, not_found, insufficient_payment, unavailable)"
    );

    describe_counter!(
        "eventchain_tickets_validated_total",
        "Total number of tickets validated"
    );
    describe_counter!(
        "eventchain_validations_rejected_total",
        "Validations rejected, by reason (not_found, already_used, unauthorized, unavailable)"
    );

    describe_counter!(
        "eventchain_journal_diverged_total",
        "Times the journal stream was found holding facts the ledger had not applied"
    );
    describe_counter!(
        "eventchain_store_appended_total",
        "Journal facts appended to the PostgreSQL event store"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_without_recorder_is_harmless() {
        register_ledger_metrics();
        register_ledger_metrics();
    }
}
