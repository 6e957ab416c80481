// ============================
// crates/backend-lib/src/admission.rs
// ============================
//! RSVP admission control.
//!
//! Every state change runs as a single ledger transaction. The matching room
//! broadcast is queued before the event lock is released, and waitlist
//! promotion runs only after the triggering transaction has committed. The
//! whole sequence runs on its own task, so a caller that goes away (an HTTP
//! client disconnecting, a timeout) cannot cut it short.
use crate::error::AppError;
use crate::gateway::NotificationGateway;
use crate::ledger::{run_detached, CapacityLedger};
use crate::metrics::{CHECKIN_RECORDED, EVENT_CREATED, RSVP_COMMITTED, RSVP_REJECTED};
use crate::models::{Event, EventRecord, NewEvent, TicketKind, WaitlistEntry};
use crate::promoter::WaitlistPromoter;
use crate::validation;
use chrono::{DateTime, Utc};
use eventroom_common::{
    CheckIn, EventId, RsvpChange, RsvpStatus, ServerFrame, Ticket, TicketTypeId,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Body of an RSVP request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpRequest {
    pub status: RsvpStatus,
    #[serde(default)]
    pub ticket_type_id: Option<TicketTypeId>,
    #[serde(default)]
    pub plus_ones: u8,
}

impl RsvpRequest {
    pub fn new(status: RsvpStatus) -> Self {
        Self {
            status,
            ticket_type_id: None,
            plus_ones: 0,
        }
    }
}

/// Committed RSVP with a message describing what happened
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpOutcome {
    pub ticket: Ticket,
    pub message: String,
}

#[derive(Clone)]
pub struct AdmissionController {
    ledger: Arc<CapacityLedger>,
    gateway: Arc<NotificationGateway>,
    promoter: Arc<WaitlistPromoter>,
}

impl AdmissionController {
    pub fn new(
        ledger: Arc<CapacityLedger>,
        gateway: Arc<NotificationGateway>,
        promoter: Arc<WaitlistPromoter>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            promoter,
        }
    }

    /// Create or change a user's RSVP.
    ///
    /// A `going` request is rejected with `AtCapacity`, `RequiresApproval` or
    /// `TypeAtCapacity` rather than silently waitlisted; the client decides
    /// whether to retry with `waitlist`.
    pub async fn set_rsvp(
        &self,
        event_id: EventId,
        user_id: &str,
        request: RsvpRequest,
    ) -> Result<RsvpOutcome, AppError> {
        let this = self.clone();
        let user_id = user_id.to_string();
        run_detached(async move { this.commit_rsvp(event_id, &user_id, request).await }).await
    }

    async fn commit_rsvp(
        &self,
        event_id: EventId,
        user_id: &str,
        request: RsvpRequest,
    ) -> Result<RsvpOutcome, AppError> {
        let committed = match self
            .ledger
            .transact(event_id, |record| apply_rsvp(record, user_id, &request, Utc::now()))
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                if e.is_policy() {
                    counter!(RSVP_REJECTED, "code" => e.error_code()).increment(1);
                    info!(%event_id, %user_id, code = e.error_code(), "rsvp rejected");
                }
                return Err(e);
            },
        };

        let change = committed.value().clone();
        self.gateway.publish(
            event_id,
            ServerFrame::RsvpUpdate {
                event_id,
                data: change.clone(),
            },
            None,
        );
        drop(committed);

        counter!(RSVP_COMMITTED).increment(1);
        info!(
            %event_id,
            %user_id,
            previous = ?change.previous,
            status = ?change.status,
            "rsvp committed"
        );

        if change.previous == Some(RsvpStatus::Going) && change.status != RsvpStatus::Going {
            self.run_promotion(event_id).await;
        }

        Ok(RsvpOutcome {
            message: change.status.outcome_message().to_string(),
            ticket: change.ticket,
        })
    }

    /// Create an event; returns the stored record
    pub async fn create_event(
        &self,
        organizer_id: &str,
        new_event: NewEvent,
    ) -> Result<EventRecord, AppError> {
        validation::validate_new_event(&new_event)?;
        let record = self
            .ledger
            .create(new_event.into_record(organizer_id, Utc::now()))
            .await?;
        counter!(EVENT_CREATED).increment(1);
        info!(event_id = %record.id(), %organizer_id, "event created");
        Ok(record)
    }

    /// Change the event capacity (`None` for unlimited). Growing it promotes
    /// from the waitlist; shrinking it never revokes confirmed tickets.
    pub async fn update_capacity(
        &self,
        event_id: EventId,
        user_id: &str,
        capacity: Option<u32>,
    ) -> Result<Event, AppError> {
        validation::validate_capacity(capacity)?;
        let this = self.clone();
        let user_id = user_id.to_string();
        run_detached(async move { this.commit_capacity(event_id, &user_id, capacity).await }).await
    }

    async fn commit_capacity(
        &self,
        event_id: EventId,
        user_id: &str,
        capacity: Option<u32>,
    ) -> Result<Event, AppError> {
        let committed = self
            .ledger
            .transact(event_id, |record| {
                if !record.is_organizer(user_id) {
                    return Err(AppError::Forbidden(
                        "Only the organizer can change capacity".to_string(),
                    ));
                }
                let grew = match (record.event.capacity, capacity) {
                    (Some(old), Some(new)) => new > old,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                record.event.capacity = capacity;
                Ok((record.event.clone(), grew))
            })
            .await?;
        let (event, grew) = committed.into_inner();
        info!(%event_id, capacity = ?event.capacity, "capacity updated");

        if grew {
            self.run_promotion(event_id).await;
        }
        Ok(event)
    }

    /// The event's waitlist in priority order; organizer only
    pub async fn waitlist(
        &self,
        event_id: EventId,
        user_id: &str,
    ) -> Result<Vec<WaitlistEntry>, AppError> {
        let record = self.ledger.snapshot(event_id).await?;
        if !record.is_organizer(user_id) {
            return Err(AppError::Forbidden(
                "Only the organizer can view the waitlist".to_string(),
            ));
        }
        Ok(record.waitlist)
    }

    pub async fn ticket(&self, event_id: EventId, user_id: &str) -> Result<Option<Ticket>, AppError> {
        let record = self.ledger.snapshot(event_id).await?;
        Ok(record.ticket(user_id).cloned())
    }

    /// Record a confirmed attendee's arrival. Checking in twice returns the
    /// original check-in and does not broadcast again.
    pub async fn check_in(&self, event_id: EventId, user_id: &str) -> Result<CheckIn, AppError> {
        let this = self.clone();
        let user_id = user_id.to_string();
        run_detached(async move { this.commit_check_in(event_id, &user_id).await }).await
    }

    async fn commit_check_in(&self, event_id: EventId, user_id: &str) -> Result<CheckIn, AppError> {
        let committed = self
            .ledger
            .transact(event_id, |record| {
                if record.ticket(user_id).map(|t| t.status) != Some(RsvpStatus::Going) {
                    return Err(AppError::Forbidden(
                        "Only confirmed attendees can check in".to_string(),
                    ));
                }
                if let Some(existing) = record.check_ins.iter().find(|c| c.user_id == user_id) {
                    return Ok((existing.clone(), false));
                }
                let check_in = CheckIn {
                    event_id: record.id(),
                    user_id: user_id.to_string(),
                    checked_in_at: Utc::now(),
                };
                record.check_ins.push(check_in.clone());
                Ok((check_in, true))
            })
            .await?;

        let (check_in, is_new) = committed.value().clone();
        if is_new {
            self.gateway.publish(
                event_id,
                ServerFrame::CheckinNew {
                    event_id,
                    data: check_in.clone(),
                },
                None,
            );
            counter!(CHECKIN_RECORDED).increment(1);
        }
        Ok(check_in)
    }

    async fn run_promotion(&self, event_id: EventId) {
        match self.promoter.promote(event_id).await {
            Ok(promoted) if !promoted.is_empty() => {
                info!(%event_id, count = promoted.len(), "waitlist promotion finished");
            },
            Ok(_) => {},
            // The triggering change is already committed; a later trigger retries
            Err(e) => warn!(%event_id, "waitlist promotion failed: {e}"),
        }
    }
}

/// Admission decision plus ticket upsert and waitlist bookkeeping for one RSVP
fn apply_rsvp(
    record: &mut EventRecord,
    user_id: &str,
    request: &RsvpRequest,
    now: DateTime<Utc>,
) -> Result<RsvpChange, AppError> {
    let ticket_type_id = match request.ticket_type_id {
        Some(id) if record.ticket_type(id).is_none() => {
            return Err(AppError::NotFound("Ticket type".to_string()));
        },
        Some(id) => Some(id),
        // An event with a single ticket type needs no explicit choice
        None if record.ticket_types.len() == 1 => Some(record.ticket_types[0].id),
        None => None,
    };
    validation::validate_plus_ones(request.plus_ones)?;

    if request.status == RsvpStatus::Going {
        if !record.has_room_for(user_id) {
            return Err(AppError::AtCapacity(record.id()));
        }
        if let Some(type_id) = ticket_type_id {
            if record.ticket_type(type_id).is_some_and(|t| t.kind == TicketKind::Approval) {
                return Err(AppError::RequiresApproval(type_id));
            }
            if !record.type_has_room_for(type_id, user_id) {
                return Err(AppError::TypeAtCapacity(type_id));
            }
        }
    }

    let event_id = record.id();
    let previous = record.ticket(user_id).map(|t| t.status);
    let ticket = record
        .tickets
        .entry(user_id.to_string())
        .and_modify(|t| {
            t.status = request.status;
            t.ticket_type_id = ticket_type_id;
            t.plus_ones = request.plus_ones;
            t.updated_at = now;
        })
        .or_insert_with(|| Ticket {
            id: Uuid::new_v4(),
            event_id,
            user_id: user_id.to_string(),
            status: request.status,
            ticket_type_id,
            plus_ones: request.plus_ones,
            created_at: now,
            updated_at: now,
        })
        .clone();

    if request.status == RsvpStatus::Waitlist {
        record.enqueue_waitlist(user_id, now);
    } else {
        record.remove_waitlist_entry(user_id);
    }

    Ok(RsvpChange {
        user_id: user_id.to_string(),
        previous,
        status: request.status,
        ticket,
    })
}
