//! SQLite store for audit entries and user profiles.
//!
//! Backs the `AuditStore` and `ProfileStore` ports for deployments that keep
//! durable branch state next to the service. Tables are created idempotently
//! on `migrate`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use tracing::instrument;

use crate::domain::{AuditLogEntry, BranchId, TenantId, UserId};
use crate::ports::{AuditStore, ProfileStore, StoreError};

/// Durable store for switch audit entries and selected branches.
pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS branch_audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                from_branch_id TEXT,
                to_branch_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                session_id TEXT NOT NULL,
                client_context TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                selected_branch_id TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Audit entries recorded under one session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    #[instrument(skip(self))]
    pub async fn audit_entries(&self, session_id: &str) -> Result<Vec<AuditLogEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, tenant_id, from_branch_id, to_branch_id,
                    timestamp, session_id, client_context
             FROM branch_audit_log WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let from_branch_id: Option<String> = row.try_get("from_branch_id")?;
            let timestamp: String = row.try_get("timestamp")?;
            entries.push(AuditLogEntry {
                user_id: parse_id(UserId::new(row.try_get::<String, _>("user_id")?))?,
                tenant_id: parse_id(TenantId::new(row.try_get::<String, _>("tenant_id")?))?,
                from_branch_id: from_branch_id
                    .map(|id| parse_id(BranchId::new(id)))
                    .transpose()?,
                to_branch_id: parse_id(BranchId::new(
                    row.try_get::<String, _>("to_branch_id")?,
                ))?,
                timestamp: parse_timestamp(&timestamp)?,
                session_id: row.try_get("session_id")?,
                client_context: row.try_get("client_context")?,
            });
        }
        Ok(entries)
    }
}

fn parse_id<T>(result: Result<T, crate::domain::BranchError>) -> Result<T, StoreError> {
    result.map_err(|e| StoreError::Backend(format!("malformed stored id: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("malformed stored timestamp: {e}")))
}

#[async_trait]
impl AuditStore for SqliteContextStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO branch_audit_log
                (user_id, tenant_id, from_branch_id, to_branch_id,
                 timestamp, session_id, client_context)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.user_id.as_str())
        .bind(entry.tenant_id.as_str())
        .bind(entry.from_branch_id.as_ref().map(BranchId::as_str))
        .bind(entry.to_branch_id.as_str())
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.session_id)
        .bind(&entry.client_context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteContextStore {
    async fn selected_branch(&self, user_id: &UserId) -> Result<Option<BranchId>, StoreError> {
        let row = sqlx::query("SELECT selected_branch_id FROM user_profiles WHERE user_id = ?")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let id: String = r.try_get("selected_branch_id")?;
            parse_id(BranchId::new(id))
        })
        .transpose()
    }

    async fn set_selected_branch(
        &self,
        user_id: &UserId,
        branch_id: &BranchId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_profiles (user_id, selected_branch_id) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET selected_branch_id = excluded.selected_branch_id",
        )
        .bind(user_id.as_str())
        .bind(branch_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
