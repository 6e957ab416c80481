// crates/backend-lib/src/models.rs

//! Event aggregate as held by the store.
//!
//! An [`EventRecord`] is the unit of transactional consistency: the event, its
//! ticket types, every ticket, the waitlist and check-ins are loaded, mutated
//! and saved together under the event's lock.
use chrono::{DateTime, Utc};
use eventroom_common::{CheckIn, EventId, RsvpStatus, Ticket, TicketTypeId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Who may see an event and subscribe to its room
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    InviteOnly,
    ApprovalRequired,
}

impl Visibility {
    /// Gated events only admit room subscribers holding a `going` ticket
    pub fn requires_confirmed_rsvp(self) -> bool {
        matches!(self, Visibility::InviteOnly | Visibility::ApprovalRequired)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Free,
    Paid,
    Donation,
    Approval,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: TicketTypeId,
    pub event_id: EventId,
    pub name: String,
    pub kind: TicketKind,
    /// `None` means the type is bounded only by the event capacity
    pub capacity: Option<u32>,
    pub price_cents: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    /// User who created the event and may manage it
    pub organizer_id: UserId,
    pub title: String,
    /// `None` means unlimited
    pub capacity: Option<u32>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

/// A queued request for a confirmed spot; lower priority is served first
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistEntry {
    pub event_id: EventId,
    pub user_id: UserId,
    pub priority: u64,
    pub created_at: DateTime<Utc>,
}

/// Everything the admission path reads and writes for one event
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event: Event,
    pub ticket_types: Vec<TicketType>,
    /// Keyed by user: at most one ticket per (event, user)
    pub tickets: BTreeMap<UserId, Ticket>,
    /// Kept sorted by ascending priority
    pub waitlist: Vec<WaitlistEntry>,
    pub check_ins: Vec<CheckIn>,
    /// High-water mark of assigned waitlist priorities
    #[serde(default)]
    pub last_priority: u64,
}

impl EventRecord {
    pub fn new(event: Event, ticket_types: Vec<TicketType>) -> Self {
        Self {
            event,
            ticket_types,
            tickets: BTreeMap::new(),
            waitlist: Vec::new(),
            check_ins: Vec::new(),
            last_priority: 0,
        }
    }

    pub fn id(&self) -> EventId {
        self.event.id
    }

    pub fn ticket_type(&self, id: TicketTypeId) -> Option<&TicketType> {
        self.ticket_types.iter().find(|t| t.id == id)
    }

    pub fn ticket(&self, user_id: &str) -> Option<&Ticket> {
        self.tickets.get(user_id)
    }

    pub fn waitlist_entry(&self, user_id: &str) -> Option<&WaitlistEntry> {
        self.waitlist.iter().find(|e| e.user_id == user_id)
    }

    /// Queue a user at the back of the waitlist. No-op if already queued.
    pub fn enqueue_waitlist(&mut self, user_id: &str, now: DateTime<Utc>) -> u64 {
        if let Some(entry) = self.waitlist_entry(user_id) {
            return entry.priority;
        }
        let current_max = self.waitlist.iter().map(|e| e.priority).max().unwrap_or(0);
        let priority = current_max.max(self.last_priority) + 1;
        self.last_priority = priority;
        self.waitlist.push(WaitlistEntry {
            event_id: self.event.id,
            user_id: user_id.to_string(),
            priority,
            created_at: now,
        });
        self.waitlist.sort_by_key(|e| e.priority);
        priority
    }

    pub fn remove_waitlist_entry(&mut self, user_id: &str) -> Option<WaitlistEntry> {
        let idx = self.waitlist.iter().position(|e| e.user_id == user_id)?;
        Some(self.waitlist.remove(idx))
    }

    pub fn is_organizer(&self, user_id: &str) -> bool {
        self.event.organizer_id == user_id
    }

    /// Whether `user_id` may subscribe to the room and post into it
    pub fn admits_to_room(&self, user_id: &str) -> bool {
        if self.is_organizer(user_id) || !self.event.visibility.requires_confirmed_rsvp() {
            return true;
        }
        self.ticket(user_id)
            .is_some_and(|t| t.status == RsvpStatus::Going)
    }
}

/// Input for creating a ticket type alongside its event
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewTicketType {
    pub name: String,
    pub kind: TicketKind,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub price_cents: Option<u64>,
}

/// Input for creating an event
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub capacity: Option<u32>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub ticket_types: Vec<NewTicketType>,
}

impl NewEvent {
    /// Materialize the record, adding a free "General" type when none was given
    pub fn into_record(self, organizer_id: &str, now: DateTime<Utc>) -> EventRecord {
        let event_id = Uuid::new_v4();
        let mut requested = self.ticket_types;
        if requested.is_empty() {
            requested.push(NewTicketType {
                name: "General".to_string(),
                kind: TicketKind::Free,
                capacity: None,
                price_cents: None,
            });
        }
        let ticket_types = requested
            .into_iter()
            .map(|ticket_type| TicketType {
                id: Uuid::new_v4(),
                event_id,
                name: ticket_type.name,
                kind: ticket_type.kind,
                capacity: ticket_type.capacity,
                price_cents: ticket_type.price_cents,
            })
            .collect();
        let event = Event {
            id: event_id,
            organizer_id: organizer_id.to_string(),
            title: self.title,
            capacity: self.capacity,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            visibility: self.visibility,
            created_at: now,
        };
        EventRecord::new(event, ticket_types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_event(ticket_types: Vec<NewTicketType>) -> NewEvent {
        let starts_at = Utc::now() + Duration::days(1);
        NewEvent {
            title: "Launch party".to_string(),
            capacity: Some(10),
            starts_at,
            ends_at: starts_at + Duration::hours(3),
            visibility: Visibility::Public,
            ticket_types,
        }
    }

    #[test]
    fn test_default_ticket_type_is_created() {
        let record = new_event(vec![]).into_record("host", Utc::now());
        assert_eq!(record.ticket_types.len(), 1);
        assert_eq!(record.ticket_types[0].name, "General");
        assert_eq!(record.ticket_types[0].kind, TicketKind::Free);
        assert_eq!(record.ticket_types[0].event_id, record.id());
    }

    #[test]
    fn test_supplied_ticket_types_are_kept() {
        let record = new_event(vec![NewTicketType {
            name: "VIP".to_string(),
            kind: TicketKind::Paid,
            capacity: Some(2),
            price_cents: Some(5000),
        }])
        .into_record("host", Utc::now());
        assert_eq!(record.ticket_types.len(), 1);
        assert_eq!(record.ticket_types[0].name, "VIP");
    }

    #[test]
    fn test_waitlist_priorities_are_never_reused() {
        let mut record = new_event(vec![]).into_record("host", Utc::now());
        let now = Utc::now();
        assert_eq!(record.enqueue_waitlist("a", now), 1);
        assert_eq!(record.enqueue_waitlist("b", now), 2);
        // Re-queueing an existing entry keeps its place
        assert_eq!(record.enqueue_waitlist("a", now), 1);

        record.remove_waitlist_entry("b");
        record.remove_waitlist_entry("a");
        assert!(record.waitlist.is_empty());
        assert_eq!(record.enqueue_waitlist("c", now), 3);
    }

    #[test]
    fn test_room_admission() {
        let mut event = new_event(vec![]);
        event.visibility = Visibility::InviteOnly;
        let mut record = event.into_record("host", Utc::now());
        let now = Utc::now();
        assert!(record.admits_to_room("host"));
        assert!(!record.admits_to_room("guest"));

        record.tickets.insert(
            "guest".to_string(),
            Ticket {
                id: Uuid::new_v4(),
                event_id: record.id(),
                user_id: "guest".to_string(),
                status: RsvpStatus::Maybe,
                ticket_type_id: None,
                plus_ones: 0,
                created_at: now,
                updated_at: now,
            },
        );
        assert!(!record.admits_to_room("guest"));
        if let Some(ticket) = record.tickets.get_mut("guest") {
            ticket.status = RsvpStatus::Going;
        }
        assert!(record.admits_to_room("guest"));
    }

    #[test]
    fn test_visibility_gating() {
        assert!(!Visibility::Public.requires_confirmed_rsvp());
        assert!(!Visibility::Unlisted.requires_confirmed_rsvp());
        assert!(Visibility::InviteOnly.requires_confirmed_rsvp());
        assert!(Visibility::ApprovalRequired.requires_confirmed_rsvp());
    }
}
