// ============================
// crates/backend-lib/src/notifier.rs
// ============================
//! Out-of-band notifications (email, push) sent after a waitlist promotion.
//!
//! Delivery is best effort: a failing notifier never undoes a promotion.
use crate::models::Event;
use async_trait::async_trait;
use eventroom_common::Ticket;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell a user their waitlisted RSVP is now confirmed
    async fn notify_promoted(&self, event: &Event, ticket: &Ticket) -> anyhow::Result<()>;
}

/// Notifier that only writes to the log; used when no delivery channel is configured
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_promoted(&self, event: &Event, ticket: &Ticket) -> anyhow::Result<()> {
        info!(
            event_id = %event.id,
            user_id = %ticket.user_id,
            title = %event.title,
            "promotion notice: a spot opened up and your RSVP is confirmed"
        );
        Ok(())
    }
}
