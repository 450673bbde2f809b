//! Ports to the platform services the branch-context layer consumes.
//!
//! The location directory, user profile store, document collections, and the
//! durable audit sink all live outside this layer. They are injected as trait
//! objects so server deployments, tests, and tooling can swap backends.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::domain::{AuditLogEntry, BranchId, TenantId, UserId};

/// Errors that can occur when talking to a collaborator store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database-related error.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    /// The backend rejected or could not serve the request.
    #[error("backend error: {0}")]
    Backend(String),
}

/// A document record as stored in a tenant collection.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// An equality filter on a single record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    /// Field name to match on.
    pub field: String,
    /// Required string value.
    pub value: String,
}

impl FieldFilter {
    /// Create a filter matching `field == value`.
    #[must_use]
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether a record satisfies this filter.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        record
            .get(&self.field)
            .and_then(serde_json::Value::as_str)
            .is_some_and(|v| v == self.value)
    }
}

/// An open live feed over one collection.
///
/// The backend pushes full snapshots into `updates` until `canceller` fires
/// or the feed is dropped.
pub struct LiveFeed {
    /// Snapshot batches pushed by the backend.
    pub updates: mpsc::Receiver<Vec<Record>>,
    /// Cancels the feed at the backend. Dropping it without sending also
    /// ends the feed.
    pub canceller: tokio::sync::oneshot::Sender<()>,
}

/// Raw location record as returned by the location directory.
///
/// Directory rows predate the branch layer and come with gaps; every field
/// except the id is optional and defaulted during catalog mapping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationRecord {
    /// Location/branch id.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
    /// Street address.
    pub address: Option<String>,
    /// Contact phone.
    pub phone: Option<String>,
    /// Branch manager's name.
    pub manager_name: Option<String>,
    /// `"active"` / `"inactive"`; anything else maps to inactive.
    pub status: Option<String>,
    /// Whether this is the tenant's main location.
    pub is_main: Option<bool>,
}

/// Directory of a tenant's locations.
#[async_trait]
pub trait LocationDirectory: Send + Sync {
    /// List all location records for a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be reached.
    async fn locations_for_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<LocationRecord>, StoreError>;
}

/// Per-user profile persistence (selected branch).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Read the user's previously selected branch, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be read.
    async fn selected_branch(&self, user_id: &UserId) -> Result<Option<BranchId>, StoreError>;

    /// Persist the user's selected branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn set_selected_branch(
        &self,
        user_id: &UserId,
        branch_id: &BranchId,
    ) -> Result<(), StoreError>;
}

/// Generic query and live-subscription access to named collections.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Query a collection, optionally filtered on a single field.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn query(
        &self,
        collection: &str,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Open a live feed over a collection with the given filter shape.
    fn subscribe(&self, collection: &str, filter: Option<FieldFilter>) -> LiveFeed;
}

/// Durable sink for switch audit entries.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;
}
