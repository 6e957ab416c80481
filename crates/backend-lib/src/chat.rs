// ============================
// crates/backend-lib/src/chat.rs
// ============================
//! Room chat: posting, deleting and replaying messages.
use crate::error::AppError;
use crate::gateway::NotificationGateway;
use crate::ledger::{run_detached, CapacityLedger};
use crate::metrics::MESSAGE_POSTED;
use crate::validation;
use chrono::Utc;
use eventroom_common::{ChatMessage, EventId, MessageDeleted, MessageId, ServerFrame};
use metrics::counter;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatService {
    ledger: Arc<CapacityLedger>,
    gateway: Arc<NotificationGateway>,
    history_limit: usize,
}

impl ChatService {
    pub fn new(
        ledger: Arc<CapacityLedger>,
        gateway: Arc<NotificationGateway>,
        history_limit: usize,
    ) -> Self {
        Self {
            ledger,
            gateway,
            history_limit,
        }
    }

    /// Post into a room the user is allowed to enter, then broadcast it
    pub async fn post_message(
        &self,
        event_id: EventId,
        user_id: &str,
        body: &str,
    ) -> Result<ChatMessage, AppError> {
        let body = validation::validate_message_body(body)?.to_string();
        let this = self.clone();
        let user_id = user_id.to_string();
        run_detached(async move { this.append(event_id, &user_id, &body).await }).await
    }

    async fn append(
        &self,
        event_id: EventId,
        user_id: &str,
        body: &str,
    ) -> Result<ChatMessage, AppError> {
        let lock = self.ledger.lock_event(event_id).await?;
        if !lock.record().admits_to_room(user_id) {
            return Err(AppError::Forbidden(
                "A confirmed RSVP is required to post here".to_string(),
            ));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            event_id,
            user_id: user_id.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        };
        self.ledger.storage().append_message(&message).await?;
        self.gateway.publish(
            event_id,
            ServerFrame::MessageNew {
                event_id,
                data: message.clone(),
            },
            None,
        );
        drop(lock);

        counter!(MESSAGE_POSTED).increment(1);
        tracing::debug!(%event_id, %user_id, message_id = %message.id, "message posted");
        Ok(message)
    }

    /// Delete a message; only its author may do so
    pub async fn delete_message(
        &self,
        event_id: EventId,
        message_id: MessageId,
        user_id: &str,
    ) -> Result<(), AppError> {
        let this = self.clone();
        let user_id = user_id.to_string();
        run_detached(async move { this.remove(event_id, message_id, &user_id).await }).await
    }

    async fn remove(
        &self,
        event_id: EventId,
        message_id: MessageId,
        user_id: &str,
    ) -> Result<(), AppError> {
        let lock = self.ledger.lock_event(event_id).await?;
        let storage = self.ledger.storage();
        let message = storage
            .get_message(event_id, message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message".to_string()))?;
        if message.user_id != user_id {
            return Err(AppError::Forbidden(
                "Only the author can delete a message".to_string(),
            ));
        }

        storage.delete_message(event_id, message_id).await?;
        self.gateway.publish(
            event_id,
            ServerFrame::MessageDelete {
                event_id,
                data: MessageDeleted { message_id },
            },
            None,
        );
        drop(lock);
        Ok(())
    }

    /// Most recent messages, oldest first, capped at the configured history limit
    pub async fn history(
        &self,
        event_id: EventId,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let limit = limit.map_or(self.history_limit, |l| l.min(self.history_limit));
        self.ledger
            .storage()
            .recent_messages(event_id, limit)
            .await
    }

    /// History for a user, checking they may see the room
    pub async fn history_for(
        &self,
        event_id: EventId,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let record = self.ledger.snapshot(event_id).await?;
        if !record.admits_to_room(user_id) {
            return Err(AppError::Forbidden(
                "A confirmed RSVP is required to read this room".to_string(),
            ));
        }
        self.history(event_id, limit).await
    }
}
