// ============================
// crates/backend-lib/src/handlers/events.rs
// ============================
//! HTTP endpoints for events, RSVPs, check-ins and room chat.
//!
//! Every route expects `Authorization: Bearer <token>`, issued by the
//! identity service. [`token_routes`] is a development stand-in for that
//! service and is mounted only when configured.
use crate::admission::{RsvpOutcome, RsvpRequest};
use crate::error::AppError;
use crate::models::{Event, EventRecord, NewEvent, TicketType, WaitlistEntry};
use crate::AppState;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use eventroom_common::{ChatMessage, CheckIn, EventId, MessageId, Ticket, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Caller identity resolved from the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        state
            .identity
            .resolve(token.trim())
            .await
            .map(AuthUser)
            .ok_or_else(|| AppError::Unauthorized("unknown or expired token".to_string()))
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/{event_id}/capacity", put(update_capacity))
        .route("/events/{event_id}/rsvp", put(set_rsvp).get(get_rsvp))
        .route("/events/{event_id}/waitlist", get(waitlist))
        .route("/events/{event_id}/checkins", post(check_in))
        .route(
            "/events/{event_id}/messages",
            get(list_messages).post(post_message),
        )
        .route(
            "/events/{event_id}/messages/{message_id}",
            delete(delete_message),
        )
}

/// `POST /tokens`: a token for any user id, no credential asked
pub fn token_routes() -> Router<Arc<AppState>> {
    Router::new().route("/tokens", post(issue_token))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub event: Event,
    pub ticket_types: Vec<TicketType>,
}

impl From<EventRecord> for EventView {
    fn from(record: EventRecord) -> Self {
        Self {
            event: record.event,
            ticket_types: record.ticket_types,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CapacityUpdate {
    #[serde(default)]
    pub capacity: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NewMessage {
    pub body: String,
}

async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TokenRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    let token = state.identity.issue(&request.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            user_id: request.user_id,
            token,
        }),
    ))
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(new_event): Json<NewEvent>,
) -> Result<(StatusCode, Json<EventView>), AppError> {
    let record = state.admission.create_event(&user_id, new_event).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

async fn update_capacity(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(event_id): Path<EventId>,
    Json(update): Json<CapacityUpdate>,
) -> Result<Json<Event>, AppError> {
    let event = state
        .admission
        .update_capacity(event_id, &user_id, update.capacity)
        .await?;
    Ok(Json(event))
}

async fn set_rsvp(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(event_id): Path<EventId>,
    Json(request): Json<RsvpRequest>,
) -> Result<Json<RsvpOutcome>, AppError> {
    let outcome = state.admission.set_rsvp(event_id, &user_id, request).await?;
    Ok(Json(outcome))
}

async fn get_rsvp(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(event_id): Path<EventId>,
) -> Result<Json<Ticket>, AppError> {
    state
        .admission
        .ticket(event_id, &user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("RSVP".to_string()))
}

async fn waitlist(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(event_id): Path<EventId>,
) -> Result<Json<Vec<WaitlistEntry>>, AppError> {
    Ok(Json(state.admission.waitlist(event_id, &user_id).await?))
}

async fn check_in(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(event_id): Path<EventId>,
) -> Result<(StatusCode, Json<CheckIn>), AppError> {
    let check_in = state.admission.check_in(event_id, &user_id).await?;
    Ok((StatusCode::CREATED, Json(check_in)))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(event_id): Path<EventId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let messages = state
        .chat
        .history_for(event_id, &user_id, query.limit)
        .await?;
    Ok(Json(messages))
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(event_id): Path<EventId>,
    Json(message): Json<NewMessage>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let message = state
        .chat
        .post_message(event_id, &user_id, &message.body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((event_id, message_id)): Path<(EventId, MessageId)>,
) -> Result<StatusCode, AppError> {
    state
        .chat
        .delete_message(event_id, message_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
