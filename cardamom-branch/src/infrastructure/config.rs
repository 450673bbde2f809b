//! Settings for the branch-context layer.
//!
//! Built from hard defaults overlaid with `CARDAMOM__`-prefixed environment
//! variables, e.g. `CARDAMOM__RESOLVER__QUERY_TIMEOUT_MS=2000`.

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::resolver::ResolverConfig;
use crate::session::RetryPolicy;

/// Top-level settings.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Identifier-resolution knobs.
    pub resolver: ResolverSettings,
    /// Branch-changed event channel knobs.
    pub events: EventSettings,
    /// Best-effort persistence knobs.
    pub persistence: PersistenceSettings,
}

/// Identifier-resolution knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct ResolverSettings {
    /// Upper bound per strategy/fallback query, in milliseconds.
    pub query_timeout_ms: u64,
    /// Whether an all-strategies-empty resolution returns the whole
    /// collection (single-branch-tenant accommodation).
    pub unfiltered_fallback: bool,
}

/// Branch-changed event channel knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct EventSettings {
    /// Broadcast channel capacity; slow subscribers past it are dropped.
    pub capacity: usize,
}

/// Best-effort persistence knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceSettings {
    /// Attempts per audit/profile write before giving up.
    pub max_attempts: u32,
    /// Base backoff between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Settings {
    /// Build settings from defaults and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment override cannot be parsed.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("resolver.query_timeout_ms", 5000)?
            .set_default("resolver.unfiltered_fallback", true)?
            .set_default("events.capacity", 64)?
            .set_default("persistence.max_attempts", 3)?
            .set_default("persistence.backoff_ms", 250)?
            .add_source(
                Environment::with_prefix("CARDAMOM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Resolver configuration derived from these settings.
    #[must_use]
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            query_timeout: Duration::from_millis(self.resolver.query_timeout_ms),
            unfiltered_fallback: self.resolver.unfiltered_fallback,
        }
    }

    /// Retry policy derived from these settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.persistence.max_attempts,
            backoff: Duration::from_millis(self.persistence.backoff_ms),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolver: ResolverSettings {
                query_timeout_ms: 5000,
                unfiltered_fallback: true,
            },
            events: EventSettings { capacity: 64 },
            persistence: PersistenceSettings {
                max_attempts: 3,
                backoff_ms: 250,
            },
        }
    }
}
