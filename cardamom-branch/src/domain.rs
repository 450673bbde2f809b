//! Branch domain types for the Cardamom platform.
//!
//! This module provides the entities shared across the branch-context layer:
//! identifiers, the `Branch` model, the active-branch pointer, and the audit
//! log entry shape.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ports::StoreError;

macro_rules! string_id {
    ($name:ident, $what:literal) => {
        /// Validated identifier newtype.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a new ", $what, " from a string.")]
            ///
            /// # Errors
            ///
            /// Returns an error if the identifier is empty.
            pub fn new(id: impl Into<String>) -> Result<Self, BranchError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(BranchError::Internal(concat!("empty ", $what).to_string()));
                }
                Ok(Self(id))
            }

            /// Get the string representation.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = BranchError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

string_id!(BranchId, "branch ID");
string_id!(TenantId, "tenant ID");
string_id!(UserId, "user ID");

/// Branch-related errors.
#[derive(Debug, thiserror::Error)]
pub enum BranchError {
    /// The requested branch is not in the current catalog.
    #[error("branch not found: {0}")]
    BranchNotFound(BranchId),
    /// The requested branch exists but is not active.
    #[error("branch not accessible: {0}")]
    BranchInactive(BranchId),
    /// No branch is currently selected.
    #[error("no active branch")]
    NoActiveBranch,
    /// A collaborator store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Branch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    /// Branch is open for business and selectable.
    #[default]
    Active,
    /// Branch is closed or suspended; it stays listed but cannot be selected.
    Inactive,
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchStatus::Active => write!(f, "active"),
            BranchStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Per-branch counters surfaced on the branch picker.
///
/// Populated by the reporting layer; the catalog only carries zeroed
/// placeholders so the shape is stable for consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchStats {
    /// Orders recorded today.
    pub orders_today: u64,
    /// Revenue recorded today, in the tenant currency's minor unit.
    pub revenue_today: i64,
    /// Staff currently assigned to the branch.
    pub staff_count: u32,
}

/// A single store location belonging to a tenant.
///
/// Immutable once loaded; the catalog replaces the whole set on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch ID.
    pub id: BranchId,
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Contact phone number.
    pub phone: String,
    /// Name of the branch manager.
    pub manager_name: String,
    /// Current status.
    pub status: BranchStatus,
    /// Whether this is the tenant's main branch.
    pub is_main: bool,
    /// Reporting counters (placeholder until populated).
    pub stats: BranchStats,
}

impl Branch {
    /// Whether the branch can be selected as the active branch.
    #[must_use]
    pub fn is_accessible(&self) -> bool {
        self.status == BranchStatus::Active
    }
}

/// Shared pointer to the currently selected branch.
///
/// At most one branch is active at a time. Only the switch orchestrator and
/// the catalog's default-selection path mutate it.
#[derive(Debug, Default)]
pub struct ActiveBranch {
    inner: RwLock<Option<Branch>>,
}

impl ActiveBranch {
    /// Create an empty pointer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the active branch, if any.
    #[must_use]
    pub fn get(&self) -> Option<Branch> {
        self.inner.read().clone()
    }

    /// ID of the active branch, if any.
    #[must_use]
    pub fn id(&self) -> Option<BranchId> {
        self.inner.read().as_ref().map(|b| b.id.clone())
    }

    /// Replace the active branch, returning the previous one.
    pub fn replace(&self, branch: Branch) -> Option<Branch> {
        self.inner.write().replace(branch)
    }

    /// Clear the pointer (logout/teardown).
    pub fn clear(&self) {
        self.inner.write().take();
    }
}

/// Free-form client context stamped on audit entries (device, app version).
pub type ClientContext = String;

/// One switch attempt that passed validation. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// User who requested the switch.
    pub user_id: UserId,
    /// Tenant the switch happened under.
    pub tenant_id: TenantId,
    /// Branch that was active before the switch, if any.
    pub from_branch_id: Option<BranchId>,
    /// Branch the switch targeted.
    pub to_branch_id: BranchId,
    /// When the switch was logged.
    pub timestamp: DateTime<Utc>,
    /// Session the switch belongs to.
    pub session_id: String,
    /// Client context at the time of the switch.
    pub client_context: ClientContext,
}

/// Outcome of a `switch_branch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The active branch changed to the target.
    Switched,
    /// The target was already active; nothing changed.
    AlreadyActive,
    /// Another switch was in flight; the call was dropped, not queued.
    Ignored,
}
