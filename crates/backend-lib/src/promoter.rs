// ============================
// crates/backend-lib/src/promoter.rs
// ============================
//! Waitlist promotion.
//!
//! Runs after a confirmed spot frees up (an attendee leaves `going`, or the
//! organizer raises capacity). Entries are promoted strictly in priority
//! order; each promotion is its own transaction that re-checks capacity, so a
//! concurrent RSVP that grabs the spot first simply ends the run.
use crate::error::AppError;
use crate::gateway::NotificationGateway;
use crate::ledger::CapacityLedger;
use crate::locks::EventLocks;
use crate::metrics::{NOTIFY_FAILED, WAITLIST_PROMOTED};
use crate::models::{Event, EventRecord, TicketKind};
use crate::notifier::Notifier;
use chrono::{DateTime, Utc};
use eventroom_common::{EventId, Promotion, RsvpStatus, ServerFrame, Ticket};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many entries an event without a capacity limit promotes per trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlimitedPromotion {
    /// Promote the head of the queue only
    #[default]
    OnePerTrigger,
    /// Promote everyone queued
    Drain,
}

/// Result of trying to promote one waitlist entry
#[derive(Debug)]
enum Step {
    Promoted(Ticket),
    /// The entry was left in place (or was stale); try the next one
    Skipped,
    /// No room left; later entries must not jump ahead
    Halt,
}

pub struct WaitlistPromoter {
    ledger: Arc<CapacityLedger>,
    gateway: Arc<NotificationGateway>,
    notifier: Arc<dyn Notifier>,
    policy: UnlimitedPromotion,
    runs: EventLocks,
}

impl WaitlistPromoter {
    pub fn new(
        ledger: Arc<CapacityLedger>,
        gateway: Arc<NotificationGateway>,
        notifier: Arc<dyn Notifier>,
        policy: UnlimitedPromotion,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifier,
            policy,
            runs: EventLocks::new(),
        }
    }

    /// Fill freed spots from the waitlist; returns the promoted tickets in order.
    ///
    /// Runs for the same event never overlap. Outbound notices are sent on
    /// their own tasks and are not awaited.
    pub async fn promote(&self, event_id: EventId) -> Result<Vec<Ticket>, AppError> {
        let _run = self.runs.lock(event_id).await;

        let snapshot = self.ledger.snapshot(event_id).await?;
        let budget = match snapshot.available_spots() {
            Some(spots) => spots,
            None => match self.policy {
                UnlimitedPromotion::OnePerTrigger => 1,
                UnlimitedPromotion::Drain => snapshot.waitlist.len(),
            },
        };
        if budget == 0 || snapshot.waitlist.is_empty() {
            return Ok(Vec::new());
        }

        let queue: Vec<String> = snapshot.waitlist.iter().map(|e| e.user_id.clone()).collect();
        let mut promoted = Vec::new();

        for user_id in queue {
            if promoted.len() >= budget {
                break;
            }

            let committed = match self
                .ledger
                .transact(event_id, |record| Ok(promote_entry(record, &user_id, Utc::now())))
                .await
            {
                Ok(committed) => committed,
                Err(e) => {
                    // Stop rather than skip so nobody is promoted out of order
                    warn!(%event_id, %user_id, "promotion aborted: {e}");
                    break;
                },
            };

            let ticket = match committed.value() {
                Step::Promoted(ticket) => ticket.clone(),
                Step::Skipped => continue,
                Step::Halt => break,
            };

            self.gateway.publish(
                event_id,
                ServerFrame::WaitlistPromoted {
                    event_id,
                    data: Promotion {
                        user_id: user_id.clone(),
                        ticket: ticket.clone(),
                    },
                },
                Some(user_id.clone()),
            );
            drop(committed);

            counter!(WAITLIST_PROMOTED).increment(1);
            info!(%event_id, %user_id, "promoted from waitlist");

            self.send_notice(snapshot.event.clone(), ticket.clone());
            promoted.push(ticket);
        }

        Ok(promoted)
    }

    fn send_notice(&self, event: Event, ticket: Ticket) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_promoted(&event, &ticket).await {
                counter!(NOTIFY_FAILED).increment(1);
                warn!(event_id = %event.id, user_id = %ticket.user_id, "promotion notice failed: {e:#}");
            }
        });
    }
}

fn promote_entry(record: &mut EventRecord, user_id: &str, now: DateTime<Utc>) -> Step {
    if record.waitlist_entry(user_id).is_none() {
        return Step::Skipped;
    }

    let ticket_type_id = match record.ticket(user_id) {
        Some(ticket) if ticket.status == RsvpStatus::Waitlist => ticket.ticket_type_id,
        _ => {
            // Entry without a waitlisted ticket behind it; drop it
            debug!(event_id = %record.id(), %user_id, "removing stale waitlist entry");
            record.remove_waitlist_entry(user_id);
            return Step::Skipped;
        },
    };

    if !record.has_room_for(user_id) {
        return Step::Halt;
    }
    if let Some(type_id) = ticket_type_id {
        if record.ticket_type(type_id).is_some_and(|t| t.kind == TicketKind::Approval) {
            return Step::Skipped;
        }
        if !record.type_has_room_for(type_id, user_id) {
            return Step::Halt;
        }
    }

    record.remove_waitlist_entry(user_id);
    match record.tickets.get_mut(user_id) {
        Some(ticket) => {
            ticket.status = RsvpStatus::Going;
            ticket.updated_at = now;
            Step::Promoted(ticket.clone())
        },
        None => Step::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewEvent, NewTicketType, Visibility};
    use crate::rooms::RoomRegistry;
    use crate::storage::MemoryStorage;
    use chrono::Duration;
    use uuid::Uuid;

    fn waitlisted(record: &mut EventRecord, user: &str, ticket_type: usize) {
        let now = Utc::now();
        record.tickets.insert(
            user.to_string(),
            Ticket {
                id: Uuid::new_v4(),
                event_id: record.id(),
                user_id: user.to_string(),
                status: RsvpStatus::Waitlist,
                ticket_type_id: Some(record.ticket_types[ticket_type].id),
                plus_ones: 0,
                created_at: now,
                updated_at: now,
            },
        );
        record.enqueue_waitlist(user, now);
    }

    fn record(capacity: Option<u32>, ticket_types: Vec<NewTicketType>) -> EventRecord {
        let starts_at = Utc::now();
        NewEvent {
            title: "Gig".to_string(),
            capacity,
            starts_at,
            ends_at: starts_at + Duration::hours(4),
            visibility: Visibility::Public,
            ticket_types,
        }
        .into_record("host", Utc::now())
    }

    struct StalledNotifier;

    #[async_trait::async_trait]
    impl Notifier for StalledNotifier {
        async fn notify_promoted(&self, _event: &Event, _ticket: &Ticket) -> anyhow::Result<()> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(())
        }
    }

    async fn setup(
        record: EventRecord,
        policy: UnlimitedPromotion,
    ) -> (WaitlistPromoter, Arc<CapacityLedger>, EventId) {
        setup_with(record, policy, Arc::new(crate::notifier::LogNotifier::new())).await
    }

    async fn setup_with(
        record: EventRecord,
        policy: UnlimitedPromotion,
        notifier: Arc<dyn Notifier>,
    ) -> (WaitlistPromoter, Arc<CapacityLedger>, EventId) {
        let ledger = Arc::new(CapacityLedger::new(Arc::new(MemoryStorage::new())));
        let event_id = ledger.create(record).await.unwrap().id();
        let gateway = Arc::new(NotificationGateway::new(Arc::new(RoomRegistry::new())));
        let promoter = WaitlistPromoter::new(Arc::clone(&ledger), gateway, notifier, policy);
        (promoter, ledger, event_id)
    }

    #[tokio::test]
    async fn test_promotes_in_priority_order_up_to_free_spots() {
        let mut record = record(Some(2), vec![]);
        for user in ["a", "b", "c"] {
            waitlisted(&mut record, user, 0);
        }
        let (promoter, ledger, event_id) = setup(record, UnlimitedPromotion::default()).await;

        let promoted = promoter.promote(event_id).await.unwrap();
        let users: Vec<_> = promoted.iter().map(|t| t.user_id.as_str()).collect();
        assert_eq!(users, vec!["a", "b"]);

        let snapshot = ledger.snapshot(event_id).await.unwrap();
        assert_eq!(snapshot.going_count(None), 2);
        assert_eq!(snapshot.waitlist.len(), 1);
        assert_eq!(snapshot.waitlist[0].user_id, "c");

        // Full now; nothing more to do
        assert!(promoter.promote(event_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unlimited_policies() {
        let mut base = record(None, vec![]);
        for user in ["a", "b", "c"] {
            waitlisted(&mut base, user, 0);
        }

        let (promoter, _, event_id) = setup(base.clone(), UnlimitedPromotion::OnePerTrigger).await;
        assert_eq!(promoter.promote(event_id).await.unwrap().len(), 1);

        let (promoter, _, event_id) = setup(base, UnlimitedPromotion::Drain).await;
        assert_eq!(promoter.promote(event_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_full_ticket_type_halts_the_run() {
        let mut record = record(
            Some(10),
            vec![
                NewTicketType {
                    name: "Balcony".to_string(),
                    kind: TicketKind::Free,
                    capacity: Some(1),
                    price_cents: None,
                },
                NewTicketType {
                    name: "Floor".to_string(),
                    kind: TicketKind::Free,
                    capacity: None,
                    price_cents: None,
                },
            ],
        );
        // The balcony spot is taken
        waitlisted(&mut record, "holder", 0);
        if let Some(t) = record.tickets.get_mut("holder") {
            t.status = RsvpStatus::Going;
        }
        record.remove_waitlist_entry("holder");

        waitlisted(&mut record, "a", 0);
        waitlisted(&mut record, "b", 1);
        let (promoter, ledger, event_id) = setup(record, UnlimitedPromotion::default()).await;

        assert!(promoter.promote(event_id).await.unwrap().is_empty());
        let snapshot = ledger.snapshot(event_id).await.unwrap();
        assert_eq!(snapshot.ticket("b").unwrap().status, RsvpStatus::Waitlist);
    }

    #[tokio::test]
    async fn test_approval_entries_are_skipped_not_blocking() {
        let mut record = record(
            Some(5),
            vec![
                NewTicketType {
                    name: "Speaker".to_string(),
                    kind: TicketKind::Approval,
                    capacity: None,
                    price_cents: None,
                },
                NewTicketType {
                    name: "Attendee".to_string(),
                    kind: TicketKind::Free,
                    capacity: None,
                    price_cents: None,
                },
            ],
        );
        waitlisted(&mut record, "speaker", 0);
        waitlisted(&mut record, "attendee", 1);
        let (promoter, ledger, event_id) = setup(record, UnlimitedPromotion::default()).await;

        let promoted = promoter.promote(event_id).await.unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].user_id, "attendee");

        let snapshot = ledger.snapshot(event_id).await.unwrap();
        assert!(snapshot.waitlist_entry("speaker").is_some());
    }

    #[tokio::test]
    async fn test_stale_entries_are_cleaned_up() {
        let mut record = record(Some(1), vec![]);
        record.enqueue_waitlist("ghost", Utc::now());
        waitlisted(&mut record, "real", 0);
        let (promoter, ledger, event_id) = setup(record, UnlimitedPromotion::default()).await;

        let promoted = promoter.promote(event_id).await.unwrap();
        assert_eq!(promoted[0].user_id, "real");
        assert!(ledger.snapshot(event_id).await.unwrap().waitlist.is_empty());
    }

    #[tokio::test]
    async fn test_slow_notifier_does_not_hold_up_promotion() {
        let mut record = record(Some(2), vec![]);
        for user in ["a", "b"] {
            waitlisted(&mut record, user, 0);
        }
        let (promoter, ledger, event_id) =
            setup_with(record, UnlimitedPromotion::default(), Arc::new(StalledNotifier)).await;

        let promoted = tokio::time::timeout(std::time::Duration::from_secs(1), promoter.promote(event_id))
            .await
            .expect("promotion waited on the notifier")
            .unwrap();
        assert_eq!(promoted.len(), 2);
        assert!(ledger.snapshot(event_id).await.unwrap().waitlist.is_empty());
        assert_eq!(promoter.runs.len(), 0);
    }
}
