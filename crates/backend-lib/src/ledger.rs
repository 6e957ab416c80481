// crates/backend-lib/src/ledger.rs

//! Capacity ledger and per-event transactions.
//!
//! Confirmed counts are never stored; they are derived from the tickets held in
//! the [`EventRecord`] being mutated. Every read that feeds an admission
//! decision happens inside [`CapacityLedger::transact`], under the same event
//! lock as the write that follows it, so two concurrent requests for the last
//! spot can never both observe it as free.
use crate::error::AppError;
use crate::locks::{EventGuard, EventLocks};
use crate::models::EventRecord;
use crate::storage::Storage;
use eventroom_common::{EventId, RsvpStatus, TicketTypeId};
use std::future::Future;
use std::sync::Arc;

impl EventRecord {
    /// Tickets with status `going`, optionally ignoring one user's own ticket
    pub fn going_count(&self, excluding: Option<&str>) -> usize {
        self.tickets
            .values()
            .filter(|t| t.status == RsvpStatus::Going)
            .filter(|t| excluding != Some(t.user_id.as_str()))
            .count()
    }

    /// Same as [`Self::going_count`], scoped to one ticket type
    pub fn going_count_for_type(&self, ticket_type_id: TicketTypeId, excluding: Option<&str>) -> usize {
        self.tickets
            .values()
            .filter(|t| t.status == RsvpStatus::Going && t.ticket_type_id == Some(ticket_type_id))
            .filter(|t| excluding != Some(t.user_id.as_str()))
            .count()
    }

    /// Free confirmed spots; `None` when the event is unlimited
    pub fn available_spots(&self) -> Option<usize> {
        self.event
            .capacity
            .map(|cap| (cap as usize).saturating_sub(self.going_count(None)))
    }

    /// Whether `user_id` could take a confirmed spot at the event level
    pub fn has_room_for(&self, user_id: &str) -> bool {
        match self.event.capacity {
            Some(cap) => self.going_count(Some(user_id)) < cap as usize,
            None => true,
        }
    }

    /// Whether `user_id` could take a confirmed spot of the given type
    pub fn type_has_room_for(&self, ticket_type_id: TicketTypeId, user_id: &str) -> bool {
        match self.ticket_type(ticket_type_id).and_then(|t| t.capacity) {
            Some(cap) => self.going_count_for_type(ticket_type_id, Some(user_id)) < cap as usize,
            None => true,
        }
    }
}

/// Result of a committed transaction
///
/// The event lock stays held for as long as this value lives, so anything
/// published before it is dropped is ordered exactly like the commits.
pub struct Committed<T> {
    value: T,
    _guard: EventGuard,
}

impl<T> Committed<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Release the event lock and take the result
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Exclusive view of one event, held until dropped
pub struct EventLock {
    record: EventRecord,
    _guard: EventGuard,
}

impl EventLock {
    pub fn record(&self) -> &EventRecord {
        &self.record
    }
}

/// Serializes all state changes per event on top of a [`Storage`] backend
pub struct CapacityLedger {
    storage: Arc<dyn Storage>,
    locks: EventLocks,
}

impl CapacityLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: EventLocks::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    async fn acquire(&self, event_id: EventId) -> EventGuard {
        self.locks.lock(event_id).await
    }

    /// Persist a freshly created event
    pub async fn create(&self, record: EventRecord) -> Result<EventRecord, AppError> {
        let _guard = self.acquire(record.id()).await;
        self.storage.save_event(&record).await?;
        Ok(record)
    }

    /// Lock an event and load its current state without modifying it
    pub async fn lock_event(&self, event_id: EventId) -> Result<EventLock, AppError> {
        let guard = self.acquire(event_id).await;
        let record = self
            .storage
            .load_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event".to_string()))?;
        Ok(EventLock {
            record,
            _guard: guard,
        })
    }

    /// Consistent snapshot of an event
    pub async fn snapshot(&self, event_id: EventId) -> Result<EventRecord, AppError> {
        Ok(self.lock_event(event_id).await?.record)
    }

    /// Run `f` against a working copy of the event and commit it.
    ///
    /// If `f` or the save fails, the working copy is discarded and the stored
    /// state is untouched.
    pub async fn transact<T, F>(&self, event_id: EventId, f: F) -> Result<Committed<T>, AppError>
    where
        F: FnOnce(&mut EventRecord) -> Result<T, AppError>,
    {
        let EventLock { mut record, _guard } = self.lock_event(event_id).await?;
        let value = f(&mut record)?;
        self.storage.save_event(&record).await?;
        Ok(Committed { value, _guard })
    }
}

/// Drive `work` to completion on its own task, even if the caller is dropped
pub async fn run_detached<T, F>(work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| AppError::Internal(format!("detached task failed: {e}")))?
}
