//! Typed branch-changed event channel.
//!
//! The orchestrator owns the channel and broadcasts one event per applied
//! switch; dependent views subscribe explicitly instead of listening on a
//! global bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::{Branch, BranchId, TenantId, UserId};

const BROADCAST_CAPACITY: usize = 64;

/// Event errors.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The channel is closed or this receiver lagged too far behind.
    #[error("event channel closed")]
    ChannelClosed,
}

/// Notification that the active branch changed.
#[derive(Debug, Clone)]
pub struct BranchChanged {
    /// Branch that was active before the switch, if any.
    pub from: Option<BranchId>,
    /// Branch that is now active.
    pub to: BranchId,
    /// Full entity of the new active branch.
    pub branch: Branch,
    /// User who switched.
    pub user_id: UserId,
    /// Tenant the switch happened under.
    pub tenant_id: TenantId,
}

/// Broadcasts branch-changed events to subscribed consumers.
#[derive(Clone)]
pub struct BranchEventBroadcaster {
    sender: broadcast::Sender<BranchChanged>,
    subscriber_count: Arc<AtomicUsize>,
}

impl BranchEventBroadcaster {
    /// Creates a broadcaster with an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(BROADCAST_CAPACITY)
    }

    /// Creates a broadcaster with an explicit channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Subscribes a consumer to branch-changed events.
    pub fn subscribe(&self) -> BranchEventReceiver {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        debug!(
            subscriber_count = self.subscriber_count(),
            "Branch event subscriber added"
        );
        BranchEventReceiver {
            inner: self.sender.subscribe(),
            subscriber_count: Arc::clone(&self.subscriber_count),
        }
    }

    /// Broadcasts an event. Delivery failure is logged, never propagated;
    /// a switch must not fail because nobody is listening.
    pub fn broadcast(&self, event: BranchChanged) {
        match self.sender.send(event) {
            Ok(receiver_count) => debug!(receiver_count, "Branch change broadcast"),
            Err(_) => warn!("Branch change broadcast with no subscribers"),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for BranchEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half of the branch-changed channel.
pub struct BranchEventReceiver {
    inner: broadcast::Receiver<BranchChanged>,
    subscriber_count: Arc<AtomicUsize>,
}

impl BranchEventReceiver {
    /// Receive the next branch-changed event.
    ///
    /// # Errors
    ///
    /// Returns `EventError::ChannelClosed` if the channel is closed or this
    /// receiver lagged past the channel capacity.
    pub async fn recv(&mut self) -> Result<BranchChanged, EventError> {
        self.inner.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventError::ChannelClosed,
            broadcast::error::RecvError::Lagged(count) => {
                warn!(skipped = count, "Branch event receiver lagged");
                EventError::ChannelClosed
            }
        })
    }
}

impl Drop for BranchEventReceiver {
    fn drop(&mut self) {
        self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
    }
}
