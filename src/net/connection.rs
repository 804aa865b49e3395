//! Per-connection identity and aggregate tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count dispatched connections so a stopped server can drain them
//!
//! # Design Decisions
//! - The accept loop keeps no reference to dispatched tasks; each task holds
//!   a `ConnectionGuard` and the count drops when the guard does

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::observability::metrics;

/// Global counter for connection IDs. Relaxed is enough, only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    active: AtomicU64,
    idle: Notify,
}

/// Counts in-flight connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    state: Arc<TrackerState>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The returned guard un-records it on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(active);
        ConnectionGuard {
            state: Arc::clone(&self.state),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Wait until no connection is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            // Register before checking, so a guard dropped in between still
            // wakes us.
            notified.as_mut().enable();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait until idle or until `limit` passes. Returns true if idle.
    pub async fn drain(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait_idle()).await.is_ok()
    }
}

/// Tracks one connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    state: Arc<TrackerState>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.state.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(remaining);
        if remaining == 0 {
            self.state.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection finished");
    }
}
