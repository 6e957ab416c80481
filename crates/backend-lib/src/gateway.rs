// ============================
// crates/backend-lib/src/gateway.rs
// ============================
//! Notification gateway: ordered, non-blocking fan-out of room events.
//!
//! Producers call [`NotificationGateway::publish`] while they still hold the
//! event lock of the transaction that produced the frame. Each active room has
//! one unbounded queue drained by one task, so frames reach subscribers in
//! commit order and publishing never waits on a slow connection. A task that
//! sits idle for [`FAN_OUT_IDLE`] retires and takes its queue with it.
use crate::rooms::RoomRegistry;
use dashmap::DashMap;
use eventroom_common::{EventId, ServerFrame, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const FAN_OUT_IDLE: Duration = Duration::from_secs(30);

/// One queued fan-out
#[derive(Debug)]
struct Broadcast {
    frame: Arc<ServerFrame>,
    exclude_user: Option<UserId>,
}

type Queues = DashMap<EventId, mpsc::UnboundedSender<Broadcast>>;

pub struct NotificationGateway {
    registry: Arc<RoomRegistry>,
    queues: Arc<Queues>,
    idle: Duration,
}

impl NotificationGateway {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self::with_idle(registry, FAN_OUT_IDLE)
    }

    /// Like [`Self::new`] with a custom idle period before a fan-out task retires
    pub fn with_idle(registry: Arc<RoomRegistry>, idle: Duration) -> Self {
        Self {
            registry,
            queues: Arc::new(DashMap::new()),
            idle,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Queue `frame` for every subscriber of the event room except `exclude_user`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn publish(&self, event_id: EventId, frame: ServerFrame, exclude_user: Option<UserId>) {
        // Nobody to deliver to; later joiners get the room state from history
        if self.registry.subscriber_count(event_id) == 0 && !self.queues.contains_key(&event_id) {
            return;
        }

        let broadcast = Broadcast {
            frame: Arc::new(frame),
            exclude_user,
        };

        let mut queue = self
            .queues
            .entry(event_id)
            .or_insert_with(|| self.spawn_fan_out(event_id));
        if let Err(mpsc::error::SendError(returned)) = queue.send(broadcast) {
            // The fan-out task is gone (runtime shutdown or a panic); start a fresh one
            tracing::warn!(%event_id, "fan-out task stopped, restarting");
            *queue = self.spawn_fan_out(event_id);
            if queue.send(returned).is_err() {
                tracing::error!(%event_id, "unable to queue broadcast");
            }
        }
    }

    fn spawn_fan_out(&self, event_id: EventId) -> mpsc::UnboundedSender<Broadcast> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Broadcast>();
        let registry = Arc::clone(&self.registry);
        let queues = Arc::clone(&self.queues);
        let idle = self.idle;
        tokio::spawn(async move {
            loop {
                let broadcast = match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(broadcast)) => broadcast,
                    Ok(None) => break,
                    Err(_) => {
                        // Publishers send while holding the map entry, so an
                        // empty queue checked under the same lock stays empty
                        if queues.remove_if(&event_id, |_, _| rx.is_empty()).is_some() {
                            tracing::trace!(%event_id, "fan-out retired");
                            break;
                        }
                        continue;
                    },
                };
                let delivery = registry.broadcast(
                    event_id,
                    &broadcast.frame,
                    broadcast.exclude_user.as_deref(),
                );
                tracing::trace!(
                    %event_id,
                    kind = broadcast.frame.kind(),
                    delivered = delivery.delivered,
                    dropped = delivery.dropped,
                    "fan-out"
                );
            }
        });
        tx
    }
}
