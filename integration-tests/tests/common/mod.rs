//! Shared test utilities for branch-context integration tests.
//!
//! Provides in-memory implementations of the platform ports plus helpers to
//! build a `BranchContext` over canned branches and collection data.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use cardamom_branch::domain::{AuditLogEntry, BranchId, TenantId, UserId};
use cardamom_branch::infrastructure::Settings;
use cardamom_branch::ports::{
    AuditStore, CollectionStore, FieldFilter, LiveFeed, LocationDirectory, LocationRecord,
    ProfileStore, Record, StoreError,
};
use cardamom_branch::service::{BranchContext, PlatformPorts};

/// In-memory location directory.
pub struct MemoryDirectory {
    pub locations: Mutex<Vec<LocationRecord>>,
}

#[async_trait]
impl LocationDirectory for MemoryDirectory {
    async fn locations_for_tenant(
        &self,
        _tenant_id: &TenantId,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        Ok(self.locations.lock().clone())
    }
}

/// In-memory profile store.
#[derive(Default)]
pub struct MemoryProfiles {
    pub selected: Mutex<HashMap<String, BranchId>>,
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn selected_branch(&self, user_id: &UserId) -> Result<Option<BranchId>, StoreError> {
        Ok(self.selected.lock().get(user_id.as_str()).cloned())
    }

    async fn set_selected_branch(
        &self,
        user_id: &UserId,
        branch_id: &BranchId,
    ) -> Result<(), StoreError> {
        self.selected
            .lock()
            .insert(user_id.as_str().to_string(), branch_id.clone());
        Ok(())
    }
}

/// In-memory audit sink.
#[derive(Default)]
pub struct MemoryAudit {
    pub entries: Mutex<Vec<AuditLogEntry>>,
}

#[async_trait]
impl AuditStore for MemoryAudit {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// One live feed opened against `MemoryCollections`.
pub struct OpenFeed {
    pub collection: String,
    pub filter: Option<FieldFilter>,
    pub sender: mpsc::Sender<Vec<Record>>,
    pub cancel_rx: oneshot::Receiver<()>,
    cancelled: bool,
}

impl OpenFeed {
    /// Whether the consumer cancelled this feed. Latches once observed.
    pub fn is_cancelled(&mut self) -> bool {
        if !self.cancelled {
            self.cancelled = self.cancel_rx.try_recv().is_ok();
        }
        self.cancelled
    }
}

/// In-memory collection store with scripted records and observable feeds.
#[derive(Default)]
pub struct MemoryCollections {
    pub records: Mutex<HashMap<String, Vec<Record>>>,
    pub feeds: Mutex<Vec<OpenFeed>>,
}

impl MemoryCollections {
    /// Replace the records of a collection.
    pub fn insert(&self, collection: &str, records: Vec<Record>) {
        self.records
            .lock()
            .insert(collection.to_string(), records);
    }

    /// Push a live update to every open feed on `collection`.
    pub async fn push_update(&self, collection: &str, records: Vec<Record>) {
        let senders: Vec<mpsc::Sender<Vec<Record>>> = self
            .feeds
            .lock()
            .iter()
            .filter(|f| f.collection == collection)
            .map(|f| f.sender.clone())
            .collect();
        for sender in senders {
            let _ = sender.send(records.clone()).await;
        }
    }

    /// Number of feeds ever opened on `collection`.
    pub fn feeds_opened(&self, collection: &str) -> usize {
        self.feeds
            .lock()
            .iter()
            .filter(|f| f.collection == collection)
            .count()
    }

    /// Number of feeds on `collection` the consumer has cancelled.
    pub fn feeds_cancelled(&self, collection: &str) -> usize {
        self.feeds
            .lock()
            .iter_mut()
            .filter(|f| f.collection == collection)
            .map(|f| usize::from(f.is_cancelled()))
            .sum()
    }
}

#[async_trait]
impl CollectionStore for MemoryCollections {
    async fn query(
        &self,
        collection: &str,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<Record>, StoreError> {
        let records = self
            .records
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default();
        Ok(match filter {
            Some(filter) => records.into_iter().filter(|r| filter.matches(r)).collect(),
            None => records,
        })
    }

    fn subscribe(&self, collection: &str, filter: Option<FieldFilter>) -> LiveFeed {
        let (sender, updates) = mpsc::channel(8);
        let (canceller, cancel_rx) = oneshot::channel();
        self.feeds.lock().push(OpenFeed {
            collection: collection.to_string(),
            filter,
            sender,
            cancel_rx,
            cancelled: false,
        });
        LiveFeed { updates, canceller }
    }
}

/// Everything a test needs to drive a `BranchContext` and inspect its ports.
pub struct TestPlatform {
    pub directory: Arc<MemoryDirectory>,
    pub profiles: Arc<MemoryProfiles>,
    pub collections: Arc<MemoryCollections>,
    pub audit: Arc<MemoryAudit>,
}

impl TestPlatform {
    pub fn new(locations: Vec<LocationRecord>) -> Self {
        Self {
            directory: Arc::new(MemoryDirectory {
                locations: Mutex::new(locations),
            }),
            profiles: Arc::new(MemoryProfiles::default()),
            collections: Arc::new(MemoryCollections::default()),
            audit: Arc::new(MemoryAudit::default()),
        }
    }

    pub fn ports(&self) -> PlatformPorts {
        PlatformPorts {
            directory: self.directory.clone(),
            profiles: self.profiles.clone(),
            collections: self.collections.clone(),
            audit: self.audit.clone(),
        }
    }

    /// Build a context for tenant `t1` / user `u1`.
    pub fn context(&self) -> BranchContext {
        BranchContext::new(
            tenant(),
            user(),
            "integration-tests".to_string(),
            self.ports(),
            &Settings::default(),
        )
    }
}

pub fn tenant() -> TenantId {
    TenantId::new("t1").expect("valid tenant id")
}

pub fn user() -> UserId {
    UserId::new("u1").expect("valid user id")
}

pub fn b(id: &str) -> BranchId {
    BranchId::new(id).expect("valid branch id")
}

/// A directory row for branch `id`.
pub fn location(id: &str, is_main: bool) -> LocationRecord {
    LocationRecord {
        id: id.to_string(),
        name: Some(format!("Branch {id}")),
        is_main: Some(is_main),
        ..LocationRecord::default()
    }
}

/// A record tagged `field = value` with a distinguishing `v` marker.
pub fn tagged(field: &str, value: &str, v: i64) -> Record {
    let mut r = Record::new();
    r.insert(field.to_string(), value.into());
    r.insert("v".to_string(), v.into());
    r
}
