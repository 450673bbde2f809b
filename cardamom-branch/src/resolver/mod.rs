//! Identifier resolution across heterogeneous legacy schemas.
//!
//! Given a collection and a target branch, the resolver finds the records
//! belonging to that branch even though records were tagged with several
//! identifier shapes over time. Strategies run in a fixed priority order and
//! the first non-empty result wins; untagged single-branch tenants fall
//! through to the unfiltered collection.

mod strategies;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::domain::BranchId;
use crate::ports::{CollectionStore, FieldFilter, Record};

pub use strategies::{FieldStrategy, ValueTransform, LEGACY_STRATEGIES};

/// Resolver tuning knobs.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound for each individual strategy/fallback query.
    pub query_timeout: Duration,
    /// Whether an all-strategies-empty outcome falls back to the unfiltered
    /// collection. Accommodates single-branch tenants with untagged records;
    /// turn off for multi-branch tenants that prefer empty over over-return.
    pub unfiltered_fallback: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
            unfiltered_fallback: true,
        }
    }
}

/// Outcome of a resolution.
#[derive(Debug)]
pub struct Resolution {
    /// Records belonging to the branch (current snapshot).
    pub records: Vec<Record>,
    /// Filter shape that produced the records. `None` means the unfiltered
    /// fallback won; when nothing matched at all, this carries the primary
    /// strategy's filter so live feeds watch the canonical tag.
    pub filter: Option<FieldFilter>,
}

/// Resolves which records in a collection belong to a branch.
pub struct IdentifierResolver {
    store: Arc<dyn CollectionStore>,
    strategies: Vec<FieldStrategy>,
    config: ResolverConfig,
}

impl IdentifierResolver {
    /// Create a resolver with the standard legacy strategy table.
    #[must_use]
    pub fn new(store: Arc<dyn CollectionStore>, config: ResolverConfig) -> Self {
        Self::with_strategies(store, LEGACY_STRATEGIES.to_vec(), config)
    }

    /// Create a resolver with a custom strategy table (tests, migrations).
    #[must_use]
    pub fn with_strategies(
        store: Arc<dyn CollectionStore>,
        strategies: Vec<FieldStrategy>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            strategies,
            config,
        }
    }

    /// Resolve the records in `collection` belonging to `branch_id`.
    ///
    /// Never fails: a strategy error or timeout counts as an empty result and
    /// resolution moves on; if even the fallback fails the resolution is
    /// empty and the caller sees "no data" rather than an error.
    #[instrument(skip(self), fields(collection = %collection, branch = %branch_id))]
    pub async fn resolve(&self, collection: &str, branch_id: &BranchId) -> Resolution {
        for strategy in &self.strategies {
            let filter = strategy.filter(branch_id);
            match self.query(collection, Some(&filter)).await {
                Some(records) if !records.is_empty() => {
                    debug!(
                        field = strategy.field,
                        matched = records.len(),
                        "Strategy matched"
                    );
                    return Resolution {
                        records,
                        filter: Some(filter),
                    };
                }
                Some(_) | None => {}
            }
        }

        if self.config.unfiltered_fallback {
            if let Some(records) = self.query(collection, None).await {
                debug!(total = records.len(), "No strategy matched, unfiltered fallback");
                return Resolution {
                    records,
                    filter: None,
                };
            }
        }

        Resolution {
            records: Vec::new(),
            filter: self.strategies.first().map(|s| s.filter(branch_id)),
        }
    }

    /// One bounded query. Errors and timeouts degrade to `None`.
    async fn query(&self, collection: &str, filter: Option<&FieldFilter>) -> Option<Vec<Record>> {
        let fut = self.store.query(collection, filter);
        match tokio::time::timeout(self.config.query_timeout, fut).await {
            Ok(Ok(records)) => Some(records),
            Ok(Err(e)) => {
                warn!(collection, ?filter, "Resolution query failed: {e}");
                None
            }
            Err(_) => {
                warn!(collection, ?filter, "Resolution query timed out");
                None
            }
        }
    }
}
