//! Session identity and the branch-switch audit log.
//!
//! One session id is generated per manager (one per client load) and stamped
//! on every audit entry it produces. Entries always land in the in-memory
//! history; the durable write is a background task with a bounded retry
//! policy, and its failure never blocks or fails a switch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{AuditLogEntry, BranchId, ClientContext, TenantId, UserId};
use crate::ports::{AuditStore, StoreError};

/// Bounded retry policy for best-effort persistence tasks.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub max_attempts: u32,
    /// Base delay between attempts; grows linearly with the attempt number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Run a fallible persistence operation in the background with bounded
/// retries. Failures are logged and swallowed; the caller never waits.
pub fn spawn_with_retry<F, Fut>(label: &'static str, policy: RetryPolicy, op: F) -> JoinHandle<()>
where
    F: Fn(u32) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), StoreError>> + Send,
{
    tokio::spawn(async move {
        for attempt in 1..=policy.max_attempts.max(1) {
            match op(attempt).await {
                Ok(()) => {
                    debug!(label, attempt, "Persistence succeeded");
                    return;
                }
                Err(e) => {
                    warn!(label, attempt, "Persistence attempt failed: {e}");
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.backoff * attempt).await;
                    }
                }
            }
        }
        warn!(
            label,
            attempts = policy.max_attempts,
            "Giving up on persistence"
        );
    })
}

/// Produces a stable session identifier and records every switch attempt.
pub struct BranchSessionManager {
    session_id: String,
    client_context: ClientContext,
    history: Mutex<Vec<AuditLogEntry>>,
    audit: Arc<dyn AuditStore>,
    retry: RetryPolicy,
}

impl BranchSessionManager {
    /// Create a manager with a fresh session id.
    #[must_use]
    pub fn new(
        audit: Arc<dyn AuditStore>,
        client_context: ClientContext,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            client_context,
            history: Mutex::new(Vec::new()),
            audit,
            retry,
        }
    }

    /// Stable session id, generated once per manager.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record one validated switch.
    ///
    /// The entry is appended to the in-memory history unconditionally, then
    /// handed to the durable sink as a bounded-retry background task.
    pub fn log_switch(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        from_branch_id: Option<&BranchId>,
        to_branch_id: &BranchId,
    ) -> AuditLogEntry {
        let entry = AuditLogEntry {
            user_id: user_id.clone(),
            tenant_id: tenant_id.clone(),
            from_branch_id: from_branch_id.cloned(),
            to_branch_id: to_branch_id.clone(),
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            client_context: self.client_context.clone(),
        };

        self.history.lock().push(entry.clone());

        let audit = Arc::clone(&self.audit);
        let persisted = entry.clone();
        spawn_with_retry("audit_log", self.retry, move |_attempt| {
            let audit = Arc::clone(&audit);
            let entry = persisted.clone();
            async move { audit.append(&entry).await }
        });

        entry
    }

    /// Defensive copy of the in-memory audit history.
    #[must_use]
    pub fn history(&self) -> Vec<AuditLogEntry> {
        self.history.lock().clone()
    }
}
