//! Configuration management for the ledger.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::types::ValidationPolicy;
use eventchain_core::stream::StreamId;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Stream the ledger journals to when `EVENTCHAIN_STREAM` is unset.
pub const DEFAULT_STREAM: &str = "eventchain-ledger";

/// Ledger configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Journal stream name
    pub stream: String,
    /// Upper bound on any single store call, in milliseconds
    pub store_timeout_ms: u64,
    /// Who may validate tickets
    pub validation_policy: ValidationPolicy,
    /// `PostgreSQL` journal; `None` means the in-memory store
    pub postgres: Option<PostgresConfig>,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            stream: env::var("EVENTCHAIN_STREAM")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.stream),
            store_timeout_ms: env::var("EVENTCHAIN_STORE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.store_timeout_ms),
            validation_policy: env::var("EVENTCHAIN_VALIDATION_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.validation_policy),
            postgres: env::var("DATABASE_URL").ok().map(|url| PostgresConfig {
                url,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            }),
        }
    }

    /// Store call timeout as a [`Duration`].
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Journal stream id.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        StreamId::new(self.stream.as_str())
    }

    /// Same configuration with a different validation policy.
    #[must_use]
    pub const fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation_policy = policy;
        self
    }

    /// Same configuration with a different store timeout.
    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        #[allow(clippy::cast_possible_truncation)] // Timeouts never approach u64::MAX ms
        let millis = timeout.as_millis() as u64;
        self.store_timeout_ms = millis;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            store_timeout_ms: 2_000,
            validation_policy: ValidationPolicy::default(),
            postgres: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.stream, DEFAULT_STREAM);
        assert_eq!(config.store_timeout(), Duration::from_secs(2));
        assert_eq!(config.validation_policy, ValidationPolicy::OwnerOnly);
        assert!(config.postgres.is_none());
    }

    #[test]
    fn builders_override_fields() {
        let config = LedgerConfig::default()
            .with_validation_policy(ValidationPolicy::Anyone)
            .with_store_timeout(Duration::from_millis(50));

        assert_eq!(config.validation_policy, ValidationPolicy::Anyone);
        assert_eq!(config.store_timeout_ms, 50);
        assert_eq!(config.stream_id().as_str(), DEFAULT_STREAM);
    }
}
