// ============================
// crates/backend-lib/src/locks.rs
// ============================
//! Per-event async locks.
//!
//! An entry exists only while someone holds or waits on the lock; the last
//! guard to drop removes it, so the map tracks active events rather than
//! every event ever touched.
use dashmap::DashMap;
use eventroom_common::EventId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<EventId, Arc<Mutex<()>>>;

#[derive(Default)]
pub struct EventLocks {
    locks: Arc<LockMap>,
}

impl EventLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `event_id`
    pub async fn lock(&self, event_id: EventId) -> EventGuard {
        // Clone the Arc out so the map shard is released before awaiting
        let lock = self.locks.entry(event_id).or_default().value().clone();
        let guard = lock.lock_owned().await;
        EventGuard {
            guard: Some(guard),
            event_id,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Events currently locked or awaited
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one event until dropped
pub struct EventGuard {
    guard: Option<OwnedMutexGuard<()>>,
    event_id: EventId,
    locks: Arc<LockMap>,
}

impl Drop for EventGuard {
    fn drop(&mut self) {
        // Release our Arc first; waiters hold their own clones, so a count of
        // one means only the map refers to the mutex
        self.guard.take();
        self.locks
            .remove_if(&self.event_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
