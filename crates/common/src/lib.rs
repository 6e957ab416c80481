// ================
// common/src/lib.rs
// ================
//! Shared types used on both sides of the event room connection.
//!
//! This crate defines the WebSocket protocol frames exchanged between a client
//! and the room gateway, together with the serializable domain records those
//! frames carry. Every frame is a tagged JSON object `{type, eventId?, data?}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an event (and of its room)
pub type EventId = Uuid;
/// Identifier of a ticket type within an event
pub type TicketTypeId = Uuid;
/// Identifier of a ticket row
pub type TicketId = Uuid;
/// Identifier of a chat message
pub type MessageId = Uuid;
/// Stable user identifier issued by the identity service
pub type UserId = String;

/// Maximum number of guests an attendee may bring
pub const MAX_PLUS_ONES: u8 = 10;

/// A user's relationship to an event
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Going,
    Maybe,
    Waitlist,
    NotGoing,
}

impl RsvpStatus {
    /// Human-readable outcome for a committed transition into this status
    pub fn outcome_message(self) -> &'static str {
        match self {
            RsvpStatus::Waitlist => "Added to waitlist",
            RsvpStatus::Going => "RSVP confirmed",
            RsvpStatus::Maybe | RsvpStatus::NotGoing => "RSVP updated",
        }
    }
}

/// One user's ticket for one event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: TicketId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: RsvpStatus,
    pub ticket_type_id: Option<TicketTypeId>,
    pub plus_ones: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chat message posted into an event room
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Arrival of a confirmed attendee
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub event_id: EventId,
    pub user_id: UserId,
    pub checked_in_at: DateTime<Utc>,
}

/// Credential presented by the `auth` frame
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthData {
    pub token: String,
}

/// Payload of `auth:success`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccess {
    pub user_id: UserId,
}

/// Payload of `rsvp:update`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RsvpChange {
    pub user_id: UserId,
    /// `None` when this was the user's first RSVP for the event
    pub previous: Option<RsvpStatus>,
    pub status: RsvpStatus,
    pub ticket: Ticket,
}

/// Payload of `waitlist:promoted`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub user_id: UserId,
    pub ticket: Ticket,
}

/// Payload of `message:delete`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: MessageId,
}

/// Payload of the relayed `typing` frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub user_id: UserId,
}

/// Payload of `error`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorData {
    /// Machine-readable code, e.g. `FORBIDDEN`
    pub code: String,
    pub message: String,
}

/// Frames sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Bind a user identity to the connection
    #[serde(rename = "auth")]
    Auth { data: AuthData },
    /// Subscribe to an event room
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "eventId")]
        event_id: EventId,
    },
    /// Unsubscribe from an event room
    #[serde(rename = "leave")]
    Leave {
        #[serde(rename = "eventId")]
        event_id: EventId,
    },
    /// Typing indicator for a joined room
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "eventId")]
        event_id: EventId,
    },
}

/// Frames pushed from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "auth:success")]
    AuthSuccess { data: AuthSuccess },
    #[serde(rename = "join:success")]
    JoinSuccess {
        #[serde(rename = "eventId")]
        event_id: EventId,
    },
    /// Most recent room messages, oldest first
    #[serde(rename = "messages:history")]
    MessagesHistory {
        #[serde(rename = "eventId")]
        event_id: EventId,
        data: Vec<ChatMessage>,
    },
    #[serde(rename = "message:new")]
    MessageNew {
        #[serde(rename = "eventId")]
        event_id: EventId,
        data: ChatMessage,
    },
    #[serde(rename = "message:delete")]
    MessageDelete {
        #[serde(rename = "eventId")]
        event_id: EventId,
        data: MessageDeleted,
    },
    #[serde(rename = "rsvp:update")]
    RsvpUpdate {
        #[serde(rename = "eventId")]
        event_id: EventId,
        data: RsvpChange,
    },
    #[serde(rename = "waitlist:promoted")]
    WaitlistPromoted {
        #[serde(rename = "eventId")]
        event_id: EventId,
        data: Promotion,
    },
    #[serde(rename = "checkin:new")]
    CheckinNew {
        #[serde(rename = "eventId")]
        event_id: EventId,
        data: CheckIn,
    },
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "eventId")]
        event_id: EventId,
        data: Typing,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "eventId", default, skip_serializing_if = "Option::is_none")]
        event_id: Option<EventId>,
        data: ErrorData,
    },
}

impl ServerFrame {
    /// Build an `error` frame
    pub fn error(event_id: Option<EventId>, code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            event_id,
            data: ErrorData {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    /// Wire name of the frame, as found in its `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::AuthSuccess { .. } => "auth:success",
            ServerFrame::JoinSuccess { .. } => "join:success",
            ServerFrame::MessagesHistory { .. } => "messages:history",
            ServerFrame::MessageNew { .. } => "message:new",
            ServerFrame::MessageDelete { .. } => "message:delete",
            ServerFrame::RsvpUpdate { .. } => "rsvp:update",
            ServerFrame::WaitlistPromoted { .. } => "waitlist:promoted",
            ServerFrame::CheckinNew { .. } => "checkin:new",
            ServerFrame::Typing { .. } => "typing",
            ServerFrame::Error { .. } => "error",
        }
    }
}
