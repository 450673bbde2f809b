//! Cardamom branch context - Branch-scoped data access for multi-location tenants.
//!
//! This crate provides the branch-context layer of the Cardamom platform:
//! it knows which branch (store location) of a tenant is currently active,
//! caches that branch's data in isolation from other branches, drives safe
//! switches between branches, and resolves record ownership across the
//! legacy identifier schemes that accumulated in tenant data over time.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Branch entities, identifiers, and the shared error taxonomy.
pub mod domain;
/// Branch catalog loading and default selection.
pub mod catalog;
/// Branch-partitioned cache and live-feed subscription registry.
pub mod cache;
/// Typed branch-changed event channel.
pub mod events;
/// Infrastructure components (config, telemetry).
pub mod infrastructure;
/// Branch switch state machine.
pub mod orchestrator;
/// External collaborator ports.
pub mod ports;
/// Legacy identifier resolution strategies.
pub mod resolver;
/// Session identity and the switch audit log.
pub mod session;
/// The `BranchContext` facade.
pub mod service;
/// SQLite-backed durable stores.
pub mod storage;

pub use domain::{Branch, BranchError, BranchId, BranchStatus, SwitchOutcome, TenantId, UserId};
pub use service::BranchContext;
