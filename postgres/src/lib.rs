//! `PostgreSQL` journal storage for the EventChain ledger.
//!
//! Implements the `EventStore` trait from `eventchain-core` on top of sqlx.
//! Facts live in a single `events` table keyed by `(stream_id, version)`.
//! Appends to the same stream are serialized with a transaction-scoped
//! advisory lock, so versions are gap-free and never reused.
//!
//! # Example
//!
//! ```no_run
//! use eventchain_postgres::PostgresEventStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresEventStore::connect(
//!     "postgres://localhost/eventchain",
//!     10,
//!     Duration::from_secs(2),
//! )
//! .await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eventchain_core::event::SerializedEvent;
use eventchain_core::event_store::{EventStore, EventStoreError, StoreFuture};
use eventchain_core::stream::{StreamId, Version};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

/// `PostgreSQL`-backed [`EventStore`].
#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool against `database_url`.
    ///
    /// `acquire_timeout` bounds how long any later call waits for a
    /// connection before failing with `Unavailable`.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!(max_connections, "Connected to PostgreSQL event store");
        Ok(Self { pool })
    }

    /// Create the `events` table and its indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if a DDL statement fails.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS events (
                stream_id TEXT NOT NULL,
                version BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                event_data BYTEA NOT NULL,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (stream_id, version)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn append(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Result<Version, EventStoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Serializes appends per stream until commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(stream_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let (current,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM events WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

        #[allow(clippy::cast_sign_loss)] // Versions are written as non-negative
        let actual = Version::new(current as u64);
        if let Some(expected) = expected_version {
            if expected != actual {
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected,
                    actual,
                });
            }
        }

        let mut version = actual;
        for event in &events {
            version = version.next();
            #[allow(clippy::cast_possible_wrap)] // Streams never reach i64::MAX facts
            let row_version = version.value() as i64;

            sqlx::query(
                r"
                INSERT INTO events (stream_id, version, event_type, event_data, metadata)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(stream_id.as_str())
            .bind(row_version)
            .bind(&event.event_type)
            .bind(&event.data)
            .bind(&event.metadata)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or(e, &stream_id, actual))?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        metrics::counter!("eventchain_store_appended_total").increment(events.len() as u64);
        tracing::debug!(
            stream_id = %stream_id,
            version = %version,
            count = events.len(),
            "Appended events"
        );

        Ok(version)
    }

    async fn load(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Result<Vec<SerializedEvent>, EventStoreError> {
        #[allow(clippy::cast_possible_wrap)] // Streams never reach i64::MAX facts
        let from = from_version.map_or(0, |v| v.value() as i64);

        let rows = sqlx::query(
            r"
            SELECT event_type, event_data, metadata
            FROM events
            WHERE stream_id = $1 AND version >= $2
            ORDER BY version ASC
            ",
        )
        .bind(stream_id.as_str())
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(SerializedEvent::new(
                    row.try_get("event_type").map_err(map_sqlx_error)?,
                    row.try_get("event_data").map_err(map_sqlx_error)?,
                    row.try_get::<Option<serde_json::Value>, _>("metadata")
                        .map_err(map_sqlx_error)?,
                ))
            })
            .collect()
    }
}

impl EventStore for PostgresEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> StoreFuture<'_, Version> {
        Box::pin(self.append(stream_id, expected_version, events))
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> StoreFuture<'_, Vec<SerializedEvent>> {
        Box::pin(self.load(stream_id, from_version))
    }
}

/// Connection-level failures mean the store is unreachable; everything else
/// is a database error.
fn map_sqlx_error(error: sqlx::Error) -> EventStoreError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => EventStoreError::Unavailable(error.to_string()),
        other => EventStoreError::DatabaseError(other.to_string()),
    }
}

fn conflict_or(error: sqlx::Error, stream_id: &StreamId, expected: Version) -> EventStoreError {
    if let sqlx::Error::Database(db_err) = &error {
        if db_err.is_unique_violation() {
            return EventStoreError::ConcurrencyConflict {
                stream_id: stream_id.clone(),
                expected,
                actual: expected.next(),
            };
        }
    }
    map_sqlx_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            EventStoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            EventStoreError::Unavailable(_)
        ));
    }

    #[test]
    fn row_errors_map_to_database_error() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            EventStoreError::DatabaseError(_)
        ));
    }
}
