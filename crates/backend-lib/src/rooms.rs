// ============================
// crates/backend-lib/src/rooms.rs
// ============================
//! Room registry: which live connections are subscribed to which event rooms.
//!
//! Each room has its own lock; the outer map only guards room creation and
//! pruning, so traffic in unrelated rooms never contends. A room is pruned the
//! moment its last subscriber leaves.
use crate::metrics::{BROADCAST_DROPPED, ROOMS_ACTIVE};
use dashmap::DashMap;
use eventroom_common::{EventId, ServerFrame, UserId};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound queue of one connection
pub type FrameSender = mpsc::Sender<Arc<ServerFrame>>;

/// A connection subscribed to a room
#[derive(Clone, Debug)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    tx: FrameSender,
}

impl Subscriber {
    pub fn new(connection_id: ConnectionId, user_id: UserId, tx: FrameSender) -> Self {
        Self {
            connection_id,
            user_id,
            tx,
        }
    }
}

type Room = HashMap<ConnectionId, Subscriber>;

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Registry of live room subscriptions
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<EventId, Arc<Mutex<Room>>>,
    memberships: DashMap<ConnectionId, HashSet<EventId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a room. Re-joining is a no-op.
    pub fn join(&self, event_id: EventId, subscriber: Subscriber) {
        let connection_id = subscriber.connection_id;
        {
            // Hold the map entry while inserting so a concurrent prune
            // cannot drop the room out from under us
            let room = self.rooms.entry(event_id).or_default();
            room.lock().insert(connection_id, subscriber);
        }
        self.memberships
            .entry(connection_id)
            .or_default()
            .insert(event_id);
        gauge!(ROOMS_ACTIVE).set(self.rooms.len() as f64);
        tracing::debug!(%event_id, %connection_id, "joined room");
    }

    /// Unsubscribe a connection from a room; no-op if not subscribed
    pub fn leave(&self, event_id: EventId, connection_id: ConnectionId) {
        if let Some(mut rooms) = self.memberships.get_mut(&connection_id) {
            rooms.remove(&event_id);
        }
        self.memberships
            .remove_if(&connection_id, |_, rooms| rooms.is_empty());
        self.remove_from_room(event_id, connection_id);
    }

    /// Drop every subscription owned by a connection
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let Some((_, rooms)) = self.memberships.remove(&connection_id) else {
            return;
        };
        for event_id in rooms {
            self.remove_from_room(event_id, connection_id);
        }
        tracing::debug!(%connection_id, "connection removed from all rooms");
    }

    fn remove_from_room(&self, event_id: EventId, connection_id: ConnectionId) {
        let Some(room) = self.rooms.get(&event_id).map(|r| r.value().clone()) else {
            return;
        };
        let removed = room.lock().remove(&connection_id).is_some();
        if removed {
            self.rooms
                .remove_if(&event_id, |_, room| room.lock().is_empty());
            gauge!(ROOMS_ACTIVE).set(self.rooms.len() as f64);
            tracing::debug!(%event_id, %connection_id, "left room");
        }
    }

    pub fn is_subscribed(&self, event_id: EventId, connection_id: ConnectionId) -> bool {
        self.rooms
            .get(&event_id)
            .is_some_and(|room| room.lock().contains_key(&connection_id))
    }

    pub fn subscriber_count(&self, event_id: EventId) -> usize {
        self.rooms.get(&event_id).map_or(0, |room| room.lock().len())
    }

    /// Number of rooms with at least one subscriber
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Deliver `frame` to every subscriber of the room except `exclude_user`.
    ///
    /// Never waits on a connection: a full or closed queue drops the frame for
    /// that connection only.
    pub fn broadcast(
        &self,
        event_id: EventId,
        frame: &Arc<ServerFrame>,
        exclude_user: Option<&str>,
    ) -> Delivery {
        let Some(room) = self.rooms.get(&event_id).map(|r| r.value().clone()) else {
            return Delivery::default();
        };
        let targets: Vec<Subscriber> = room
            .lock()
            .values()
            .filter(|s| exclude_user != Some(s.user_id.as_str()))
            .cloned()
            .collect();

        let mut delivery = Delivery::default();
        for subscriber in targets {
            match subscriber.tx.try_send(Arc::clone(frame)) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    delivery.dropped += 1;
                    tracing::warn!(
                        %event_id,
                        connection_id = %subscriber.connection_id,
                        "outbound queue full, dropping {}",
                        frame.kind()
                    );
                },
                Err(TrySendError::Closed(_)) => delivery.dropped += 1,
            }
        }
        if delivery.dropped > 0 {
            counter!(BROADCAST_DROPPED).increment(delivery.dropped as u64);
        }
        delivery
    }
}
