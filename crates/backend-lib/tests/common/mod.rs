//! Shared setup for integration tests.
#![allow(dead_code)]

use chrono::{Duration, Utc};
use eventroom_backend::{
    config::Settings,
    identity::TokenIdentity,
    models::{EventRecord, NewEvent, NewTicketType, Visibility},
    notifier::{LogNotifier, Notifier},
    rooms::Subscriber,
    storage::{FlatFileStorage, MemoryStorage, Storage},
    AppState,
};
use eventroom_common::{EventId, RsvpStatus, ServerFrame};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn memory_state() -> Arc<AppState> {
    state_with(Arc::new(MemoryStorage::new()))
}

/// In-memory state with custom settings and notifier
pub fn memory_state_with(settings: Settings, notifier: Arc<dyn Notifier>) -> Arc<AppState> {
    Arc::new(AppState::new(
        settings,
        Arc::new(MemoryStorage::new()),
        Arc::new(TokenIdentity::new(std::time::Duration::from_secs(300))),
        notifier,
    ))
}

/// State over a flat-file store; keep the `TempDir` alive for the whole test
pub fn flat_file_state() -> (Arc<AppState>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let storage = FlatFileStorage::new(temp_dir.path()).unwrap();
    (state_with(Arc::new(storage)), temp_dir)
}

fn state_with(storage: Arc<dyn Storage>) -> Arc<AppState> {
    Arc::new(AppState::new(
        Settings::default(),
        storage,
        Arc::new(TokenIdentity::new(std::time::Duration::from_secs(300))),
        Arc::new(LogNotifier::new()),
    ))
}

pub fn new_event(capacity: Option<u32>) -> NewEvent {
    let starts_at = Utc::now() + Duration::days(3);
    NewEvent {
        title: "Community meetup".to_string(),
        capacity,
        starts_at,
        ends_at: starts_at + Duration::hours(2),
        visibility: Visibility::Public,
        ticket_types: Vec::<NewTicketType>::new(),
    }
}

pub async fn create_event(state: &AppState, capacity: Option<u32>) -> EventId {
    state
        .admission
        .create_event("organizer", new_event(capacity))
        .await
        .unwrap()
        .id()
}

/// Subscribe a fake connection for `user` straight through the registry
pub fn subscribe(
    state: &AppState,
    event_id: EventId,
    user: &str,
) -> mpsc::Receiver<Arc<ServerFrame>> {
    let (tx, rx) = mpsc::channel(256);
    state
        .rooms
        .join(event_id, Subscriber::new(Uuid::new_v4(), user.to_string(), tx));
    rx
}

pub async fn next_frame(rx: &mut mpsc::Receiver<Arc<ServerFrame>>) -> Arc<ServerFrame> {
    tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("subscriber channel closed")
}

/// Tickets in `waitlist` status and waitlist entries must match one to one,
/// priorities must be unique and ordered, and capacity must hold.
pub fn assert_consistent(record: &EventRecord) {
    for ticket in record.tickets.values() {
        let queued = record.waitlist_entry(&ticket.user_id).is_some();
        assert_eq!(
            ticket.status == RsvpStatus::Waitlist,
            queued,
            "ticket/waitlist mismatch for {}",
            ticket.user_id
        );
    }
    for entry in &record.waitlist {
        assert!(record.ticket(&entry.user_id).is_some());
    }
    assert!(record
        .waitlist
        .windows(2)
        .all(|pair| pair[0].priority < pair[1].priority));
    if let Some(capacity) = record.event.capacity {
        assert!(record.going_count(None) <= capacity as usize);
    }
}
