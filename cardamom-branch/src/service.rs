//! The `BranchContext` facade.
//!
//! One instance per tenant/user session, constructor-injected with the
//! platform ports. All branch-aware reads, switches, and diagnostics go
//! through here.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::cache::{BranchCache, CacheStats, SubscriptionHandle};
use crate::catalog::BranchCatalog;
use crate::domain::{
    ActiveBranch, AuditLogEntry, Branch, BranchError, BranchId, ClientContext, SwitchOutcome,
    TenantId, UserId,
};
use crate::events::{BranchEventBroadcaster, BranchEventReceiver};
use crate::infrastructure::Settings;
use crate::orchestrator::{SwitchOrchestrator, SwitchState};
use crate::ports::{
    AuditStore, CollectionStore, FieldFilter, LocationDirectory, ProfileStore, Record,
};
use crate::resolver::IdentifierResolver;
use crate::session::BranchSessionManager;

/// Platform services the branch layer consumes.
pub struct PlatformPorts {
    /// Location/branch directory for the tenant.
    pub directory: Arc<dyn LocationDirectory>,
    /// Per-user profile persistence.
    pub profiles: Arc<dyn ProfileStore>,
    /// Document collection query/subscription access.
    pub collections: Arc<dyn CollectionStore>,
    /// Durable audit sink.
    pub audit: Arc<dyn AuditStore>,
}

/// Branch-scoped data access for one tenant/user session.
pub struct BranchContext {
    tenant_id: TenantId,
    user_id: UserId,
    catalog: Arc<BranchCatalog>,
    cache: Arc<BranchCache>,
    resolver: IdentifierResolver,
    session: Arc<BranchSessionManager>,
    orchestrator: SwitchOrchestrator,
    events: BranchEventBroadcaster,
    active: Arc<ActiveBranch>,
    collections: Arc<dyn CollectionStore>,
}

impl BranchContext {
    /// Wire up a context for one tenant/user session.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        user_id: UserId,
        client_context: ClientContext,
        ports: PlatformPorts,
        settings: &Settings,
    ) -> Self {
        let catalog = Arc::new(BranchCatalog::new(
            ports.directory,
            Arc::clone(&ports.profiles),
        ));
        let cache = Arc::new(BranchCache::new());
        let resolver = IdentifierResolver::new(
            Arc::clone(&ports.collections),
            settings.resolver_config(),
        );
        let session = Arc::new(BranchSessionManager::new(
            ports.audit,
            client_context,
            settings.retry_policy(),
        ));
        let active = Arc::new(ActiveBranch::new());
        let events = BranchEventBroadcaster::with_capacity(settings.events.capacity);
        let orchestrator = SwitchOrchestrator::new(
            Arc::clone(&catalog),
            Arc::clone(&cache),
            Arc::clone(&session),
            ports.profiles,
            events.clone(),
            Arc::clone(&active),
            settings.retry_policy(),
            tenant_id.clone(),
            user_id.clone(),
        );

        Self {
            tenant_id,
            user_id,
            catalog,
            cache,
            resolver,
            session,
            orchestrator,
            events,
            active,
            collections: ports.collections,
        }
    }

    /// Load the tenant's branch catalog and, if no branch was selected in
    /// the meantime, apply the default-selection policy once.
    ///
    /// # Errors
    ///
    /// Returns an error if the location directory cannot be reached. A
    /// failed default selection is logged, not propagated.
    #[instrument(skip(self), fields(tenant = %self.tenant_id))]
    pub async fn load_catalog(&self) -> Result<Vec<Branch>, BranchError> {
        let branches = self.catalog.load(&self.tenant_id).await?;

        // The pointer must never name a branch outside the current catalog.
        // A reload can drop or close the active branch; evict and clear it so
        // the default-selection path below picks a listed branch instead.
        if let Some(id) = self.active.id() {
            if !self.catalog.get(&id).is_some_and(|b| b.is_accessible()) {
                warn!(branch = %id, "Active branch left the catalog, clearing selection");
                self.cache.clear_branch(&id);
                self.active.clear();
            }
        }

        // Deferred default selection: checked after the load so a manual
        // selection that landed first wins.
        if self.catalog.take_default_pending() && self.active.get().is_none() {
            if let Some(default) = self.catalog.default_selection(&self.user_id).await {
                debug!(branch = %default.id, "Applying default branch selection");
                if let Err(e) = self.orchestrator.switch_branch(&default.id).await {
                    warn!("Default branch selection failed: {e}");
                }
            }
        }

        Ok(branches)
    }

    /// Switch the session to another branch. See
    /// [`SwitchOrchestrator::switch_branch`] for the guarantees.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the target is unknown or inactive.
    pub async fn switch_branch(&self, branch_id: &BranchId) -> Result<SwitchOutcome, BranchError> {
        self.orchestrator.switch_branch(branch_id).await
    }

    /// Records of `collection` belonging to the active branch.
    ///
    /// A cache hit returns the snapshot as-is. On a miss the records are
    /// resolved, cached under the active branch, and a live feed is opened so
    /// later updates keep the entry current. Extra filters are applied to the
    /// returned snapshot only, never to the cache entry.
    ///
    /// # Errors
    ///
    /// Returns `BranchError::NoActiveBranch` when no branch is selected.
    /// Resolution failures degrade to an empty snapshot.
    #[instrument(skip(self, extra_filters), fields(collection = %collection))]
    pub async fn get_branch_data(
        &self,
        collection: &str,
        extra_filters: &[FieldFilter],
    ) -> Result<Vec<Record>, BranchError> {
        let branch_id = self.active.id().ok_or(BranchError::NoActiveBranch)?;

        if let Some(records) = self.cache.get(&branch_id, collection) {
            return Ok(apply_filters(records, extra_filters));
        }

        // Capture the generation before the (slow) resolution so a switch
        // that evicts this branch mid-flight invalidates the population.
        let generation = self.cache.generation(&branch_id);
        let resolution = self.resolver.resolve(collection, &branch_id).await;

        if !self
            .cache
            .set_if_current(&branch_id, generation, collection, resolution.records.clone())
        {
            // The branch was switched away while resolving; hand the caller
            // the snapshot but leave the cache and feeds alone.
            return Ok(apply_filters(resolution.records, extra_filters));
        }

        let feed = self
            .collections
            .subscribe(collection, resolution.filter.clone());
        let pump = spawn_feed_pump(
            feed.updates,
            Arc::clone(&self.cache),
            branch_id.clone(),
            generation,
            collection.to_string(),
        );
        let canceller = feed.canceller;
        self.cache.add_subscription(
            &branch_id,
            collection,
            SubscriptionHandle::new(
                Box::new(move || {
                    let _ = canceller.send(());
                }),
                pump,
            ),
        );

        Ok(apply_filters(resolution.records, extra_filters))
    }

    /// Whether `branch_id` is in the catalog and selectable.
    #[must_use]
    pub fn can_access_branch(&self, branch_id: &BranchId) -> bool {
        self.catalog
            .get(branch_id)
            .is_some_and(|b| b.is_accessible())
    }

    /// Cancel every live feed and drop every cache entry (logout/teardown).
    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }

    /// Defensive copy of this session's switch audit log.
    #[must_use]
    pub fn switch_history(&self) -> Vec<AuditLogEntry> {
        self.session.history()
    }

    /// Diagnostic cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Snapshot of the active branch, if any.
    #[must_use]
    pub fn active_branch(&self) -> Option<Branch> {
        self.active.get()
    }

    /// Branches in the current catalog.
    #[must_use]
    pub fn branches(&self) -> Vec<Branch> {
        self.catalog.all()
    }

    /// Stable session id stamped on this session's audit entries.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    /// Subscribe to branch-changed events.
    #[must_use]
    pub fn subscribe(&self) -> BranchEventReceiver {
        self.events.subscribe()
    }

    /// Current state of the switch machine.
    #[must_use]
    pub fn switch_state(&self) -> SwitchState {
        self.orchestrator.state()
    }

    /// Message from the most recent failed switch, if any.
    #[must_use]
    pub fn last_switch_error(&self) -> Option<String> {
        self.orchestrator.last_error()
    }
}

/// Forward feed batches into the cache until the feed ends or a batch is
/// rejected as stale.
fn spawn_feed_pump(
    mut updates: mpsc::Receiver<Vec<Record>>,
    cache: Arc<BranchCache>,
    branch_id: BranchId,
    generation: u64,
    collection: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = updates.recv().await {
            if !cache.set_if_current(&branch_id, generation, &collection, batch) {
                break;
            }
        }
        debug!(branch = %branch_id, collection, "Feed pump stopped");
    })
}

fn apply_filters(records: Vec<Record>, filters: &[FieldFilter]) -> Vec<Record> {
    if filters.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| filters.iter().all(|f| f.matches(r)))
        .collect()
}
