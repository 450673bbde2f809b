//! Branch switch orchestration - state machine and step ordering.
//!
//! Exactly one switch may be in flight at a time. A switch that passes
//! validation always audits the transition before any state is touched, then
//! evicts the outgoing branch, moves the active pointer, persists the
//! selection best-effort, and broadcasts the change.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::cache::BranchCache;
use crate::catalog::BranchCatalog;
use crate::domain::{ActiveBranch, BranchError, BranchId, SwitchOutcome, TenantId, UserId};
use crate::events::{BranchChanged, BranchEventBroadcaster};
use crate::ports::ProfileStore;
use crate::session::{spawn_with_retry, BranchSessionManager, RetryPolicy};

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SwitchState {
    /// No switch in flight.
    Idle = 0,
    /// A switch is being applied.
    Switching = 1,
    /// The last switch failed validation; resets to `Idle` on read paths.
    Error = 2,
}

impl From<u8> for SwitchState {
    fn from(v: u8) -> Self {
        match v {
            1 => SwitchState::Switching,
            2 => SwitchState::Error,
            _ => SwitchState::Idle,
        }
    }
}

/// Drives branch switches for one tenant/user session.
pub struct SwitchOrchestrator {
    catalog: Arc<BranchCatalog>,
    cache: Arc<BranchCache>,
    session: Arc<BranchSessionManager>,
    profiles: Arc<dyn ProfileStore>,
    events: BranchEventBroadcaster,
    active: Arc<ActiveBranch>,
    state: AtomicU8,
    last_error: Mutex<Option<String>>,
    retry: RetryPolicy,
    tenant_id: TenantId,
    user_id: UserId,
}

impl SwitchOrchestrator {
    /// Wire up an orchestrator over the session's shared components.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        catalog: Arc<BranchCatalog>,
        cache: Arc<BranchCache>,
        session: Arc<BranchSessionManager>,
        profiles: Arc<dyn ProfileStore>,
        events: BranchEventBroadcaster,
        active: Arc<ActiveBranch>,
        retry: RetryPolicy,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Self {
        Self {
            catalog,
            cache,
            session,
            profiles,
            events,
            active,
            state: AtomicU8::new(SwitchState::Idle as u8),
            last_error: Mutex::new(None),
            retry,
            tenant_id,
            user_id,
        }
    }

    /// Current state of the switch machine.
    #[must_use]
    pub fn state(&self) -> SwitchState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Message from the most recent failed switch, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Switch the session to `target_id`.
    ///
    /// A call received while a switch is already in flight is dropped, not
    /// queued, and reports `SwitchOutcome::Ignored`. Switching to the branch
    /// that is already active is an idempotent no-op that appends no audit
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns `BranchError::BranchNotFound` or `BranchError::BranchInactive`
    /// when the target fails validation; the active pointer is untouched and
    /// the caller may retry immediately.
    #[instrument(skip(self), fields(target = %target_id, user = %self.user_id))]
    pub async fn switch_branch(&self, target_id: &BranchId) -> Result<SwitchOutcome, BranchError> {
        // Reentrancy guard. Two interleaved switches could cross their cache
        // invalidation, so the loser is dropped outright.
        if !self.begin() {
            warn!("Switch already in flight, dropping request");
            return Ok(SwitchOutcome::Ignored);
        }

        // 1. Validate the target against the current catalog.
        let Some(target) = self.catalog.get(target_id) else {
            self.fail("branch not found");
            return Err(BranchError::BranchNotFound(target_id.clone()));
        };
        if !target.is_accessible() {
            self.fail("branch not accessible");
            return Err(BranchError::BranchInactive(target_id.clone()));
        }

        // 2. Idempotent no-op switch.
        let previous = self.active.id();
        if previous.as_ref() == Some(target_id) {
            self.finish();
            return Ok(SwitchOutcome::AlreadyActive);
        }

        // 3. Audit the transition before anything is mutated.
        self.session.log_switch(
            &self.user_id,
            &self.tenant_id,
            previous.as_ref(),
            target_id,
        );

        // 4. Evict the outgoing branch so no late feed delivery can land in
        //    an entry about to be treated as fresh.
        if let Some(prev) = &previous {
            self.cache.clear_branch(prev);
        }

        // 5. Move the active pointer.
        self.active.replace(target.clone());

        // 6. Persist the selection, best effort.
        let profiles = Arc::clone(&self.profiles);
        let user_id = self.user_id.clone();
        let branch_id = target_id.clone();
        spawn_with_retry("selected_branch", self.retry, move |_attempt| {
            let profiles = Arc::clone(&profiles);
            let user_id = user_id.clone();
            let branch_id = branch_id.clone();
            async move { profiles.set_selected_branch(&user_id, &branch_id).await }
        });

        // 7. Notify dependent views.
        self.events.broadcast(BranchChanged {
            from: previous.clone(),
            to: target_id.clone(),
            branch: target,
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
        });

        self.finish();
        info!(from = ?previous, "Switched active branch");
        Ok(SwitchOutcome::Switched)
    }

    /// `Idle -> Switching`, or `false` when a switch is already in flight.
    fn begin(&self) -> bool {
        self.state
            .compare_exchange(
                SwitchState::Idle as u8,
                SwitchState::Switching as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// `Switching -> Idle` after a completed or no-op switch.
    fn finish(&self) {
        self.state.store(SwitchState::Idle as u8, Ordering::SeqCst);
    }

    /// Record a validation failure and reset to `Idle` so the caller can
    /// retry immediately.
    fn fail(&self, message: &str) {
        *self.last_error.lock() = Some(message.to_string());
        self.state.store(SwitchState::Error as u8, Ordering::SeqCst);
        self.state.store(SwitchState::Idle as u8, Ordering::SeqCst);
    }
}
