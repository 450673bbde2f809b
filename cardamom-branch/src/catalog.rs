//! Branch catalog - loads and maps a tenant's locations.
//!
//! The catalog owns the `Branch` entities. Each load replaces the previous
//! set wholesale and re-arms the default-selection policy, which the facade
//! applies at most once per load and only while no manual selection landed
//! first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::domain::{Branch, BranchError, BranchId, BranchStats, BranchStatus, TenantId, UserId};
use crate::ports::{LocationDirectory, LocationRecord, ProfileStore};

/// Catalog of the tenant's branches.
pub struct BranchCatalog {
    directory: Arc<dyn LocationDirectory>,
    profiles: Arc<dyn ProfileStore>,
    branches: RwLock<Vec<Branch>>,
    default_pending: AtomicBool,
}

impl BranchCatalog {
    /// Create an empty catalog over the given collaborators.
    #[must_use]
    pub fn new(directory: Arc<dyn LocationDirectory>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            directory,
            profiles,
            branches: RwLock::new(Vec::new()),
            default_pending: AtomicBool::new(false),
        }
    }

    /// Load all locations for a tenant and replace the branch set wholesale.
    ///
    /// Re-arms the default-selection policy for this load.
    ///
    /// # Errors
    ///
    /// Returns an error if the location directory cannot be reached.
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub async fn load(&self, tenant_id: &TenantId) -> Result<Vec<Branch>, BranchError> {
        let records = self.directory.locations_for_tenant(tenant_id).await?;
        let branches: Vec<Branch> = records.into_iter().filter_map(map_location).collect();

        info!(count = branches.len(), "Loaded branch catalog");
        *self.branches.write() = branches.clone();
        self.default_pending.store(true, Ordering::SeqCst);
        Ok(branches)
    }

    /// Look up a branch by id in the current catalog.
    #[must_use]
    pub fn get(&self, branch_id: &BranchId) -> Option<Branch> {
        self.branches
            .read()
            .iter()
            .find(|b| &b.id == branch_id)
            .cloned()
    }

    /// Snapshot of all branches in the current catalog.
    #[must_use]
    pub fn all(&self) -> Vec<Branch> {
        self.branches.read().clone()
    }

    /// Arm-once check for the default-selection policy. Returns `true`
    /// exactly once after each load.
    pub fn take_default_pending(&self) -> bool {
        self.default_pending.swap(false, Ordering::SeqCst)
    }

    /// Default selection policy: the user's previously selected branch if
    /// still present and accessible, else the branch flagged main, else the
    /// first available.
    pub async fn default_selection(&self, user_id: &UserId) -> Option<Branch> {
        let previous = match self.profiles.selected_branch(user_id).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Could not read selected branch from profile: {e}");
                None
            }
        };

        if let Some(id) = previous {
            if let Some(branch) = self.get(&id).filter(Branch::is_accessible) {
                return Some(branch);
            }
        }

        let branches = self.branches.read();
        branches
            .iter()
            .find(|b| b.is_main && b.is_accessible())
            .or_else(|| branches.iter().find(|b| b.is_accessible()))
            .cloned()
    }
}

/// Map a raw directory row into a `Branch`, defaulting the gaps legacy rows
/// come with. Rows without an id are dropped.
fn map_location(record: LocationRecord) -> Option<Branch> {
    let Ok(id) = BranchId::new(record.id) else {
        warn!("Skipping location record without an id");
        return None;
    };

    // Rows predating the status flag are treated as open.
    let status = match record.status.as_deref() {
        None | Some("active") => BranchStatus::Active,
        Some(_) => BranchStatus::Inactive,
    };

    Some(Branch {
        name: record.name.unwrap_or_else(|| id.to_string()),
        address: record.address.unwrap_or_default(),
        phone: record.phone.unwrap_or_default(),
        manager_name: record.manager_name.unwrap_or_default(),
        status,
        is_main: record.is_main.unwrap_or(false),
        stats: BranchStats::default(),
        id,
    })
}
