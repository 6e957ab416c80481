// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! Per-connection protocol handling.
//!
//! A [`ConnectionHandler`] is created for every accepted socket and moves
//! through three states: unauthenticated, authenticated, and subscribed to
//! zero or more event rooms. Room events reach the connection through the
//! registry; replies to the connection's own frames are returned directly.

use crate::error::AppError;
use crate::rooms::{ConnectionId, FrameSender, Subscriber};
use crate::AppState;
use eventroom_common::{AuthSuccess, ClientFrame, EventId, ServerFrame, Typing, UserId};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

pub struct ConnectionHandler {
    state: Arc<AppState>,
    connection_id: ConnectionId,
    user_id: Option<UserId>,
    tx: FrameSender,
}

impl ConnectionHandler {
    /// `tx` is the connection's outbound queue; room broadcasts are pushed into it
    pub fn new(state: Arc<AppState>, tx: FrameSender) -> Self {
        Self {
            state,
            connection_id: Uuid::new_v4(),
            user_id: None,
            tx,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Process one client frame and return the frames to send back to it
    pub async fn handle_frame(&mut self, frame: ClientFrame) -> Vec<ServerFrame> {
        match frame {
            ClientFrame::Auth { data } => self.authenticate(&data.token).await,
            ClientFrame::Join { event_id } => match self.join(event_id).await {
                Ok(frames) => frames,
                Err(e) => vec![e.to_frame(Some(event_id))],
            },
            ClientFrame::Leave { event_id } => {
                self.state.rooms.leave(event_id, self.connection_id);
                Vec::new()
            },
            ClientFrame::Typing { event_id } => match self.typing(event_id) {
                Ok(()) => Vec::new(),
                Err(e) => vec![e.to_frame(Some(event_id))],
            },
        }
    }

    async fn authenticate(&mut self, token: &str) -> Vec<ServerFrame> {
        let Some(user_id) = self.state.identity.resolve(token).await else {
            return vec![AppError::Unauthorized("unknown or expired token".to_string()).to_frame(None)];
        };

        if let Some(current) = &self.user_id {
            if *current != user_id {
                return vec![AppError::Forbidden(
                    "Connection is already bound to another user".to_string(),
                )
                .to_frame(None)];
            }
        }

        info!(connection_id = %self.connection_id, %user_id, "connection authenticated");
        self.user_id = Some(user_id.clone());
        vec![ServerFrame::AuthSuccess {
            data: AuthSuccess { user_id },
        }]
    }

    fn require_user(&self) -> Result<&str, AppError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| AppError::Unauthorized("not authenticated".to_string()))
    }

    /// Subscribe to a room and replay its recent history.
    ///
    /// The replies are queued on the connection directly, ahead of any room
    /// broadcast, so `join:success` and the history always come first.
    async fn join(&self, event_id: EventId) -> Result<Vec<ServerFrame>, AppError> {
        let user_id = self.require_user()?.to_string();

        // Hold the event lock so no room event commits between the access
        // check, the history read and the subscription
        let lock = self.state.ledger.lock_event(event_id).await?;
        if !lock.record().admits_to_room(&user_id) {
            return Err(AppError::Forbidden(
                "A confirmed RSVP is required to join this room".to_string(),
            ));
        }
        let history = self.state.chat.history(event_id, None).await?;

        // Never wait on the socket while holding the event lock
        let permits = self
            .tx
            .try_reserve()
            .and_then(|ack| self.tx.try_reserve().map(|replay| (ack, replay)));
        let (ack, replay) = match permits {
            Ok(permits) => permits,
            Err(TrySendError::Full(())) => {
                return Err(AppError::Overloaded(format!(
                    "outbound queue full on {}",
                    self.connection_id
                )))
            },
            // The connection is going away
            Err(TrySendError::Closed(())) => return Ok(Vec::new()),
        };
        let messages = history.len();
        ack.send(Arc::new(ServerFrame::JoinSuccess { event_id }));
        replay.send(Arc::new(ServerFrame::MessagesHistory {
            event_id,
            data: history,
        }));

        self.state.rooms.join(
            event_id,
            Subscriber::new(self.connection_id, user_id.clone(), self.tx.clone()),
        );
        drop(lock);

        debug!(%event_id, %user_id, messages, "joined room");
        Ok(Vec::new())
    }

    fn typing(&self, event_id: EventId) -> Result<(), AppError> {
        let user_id = self.require_user()?;
        if !self.state.rooms.is_subscribed(event_id, self.connection_id) {
            return Err(AppError::Forbidden("Join the room first".to_string()));
        }
        self.state.gateway.publish(
            event_id,
            ServerFrame::Typing {
                event_id,
                data: Typing {
                    user_id: user_id.to_string(),
                },
            },
            Some(user_id.to_string()),
        );
        Ok(())
    }

    /// Remove every subscription held by this connection
    pub fn disconnect(&self) {
        self.state.rooms.disconnect(self.connection_id);
        debug!(connection_id = %self.connection_id, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::RsvpRequest;
    use crate::config::Settings;
    use crate::identity::TokenIdentity;
    use crate::models::{NewEvent, Visibility};
    use crate::notifier::LogNotifier;
    use crate::storage::MemoryStorage;
    use chrono::{Duration, Utc};
    use eventroom_common::{AuthData, RsvpStatus};
    use tokio::sync::mpsc;

    async fn state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Settings::default(),
            Arc::new(MemoryStorage::new()),
            Arc::new(TokenIdentity::new(std::time::Duration::from_secs(60))),
            Arc::new(LogNotifier::new()),
        ))
    }

    async fn event(state: &AppState, visibility: Visibility) -> EventId {
        let starts_at = Utc::now();
        state
            .admission
            .create_event(
                "host",
                NewEvent {
                    title: "Reading".to_string(),
                    capacity: Some(10),
                    starts_at,
                    ends_at: starts_at + Duration::hours(1),
                    visibility,
                    ticket_types: vec![],
                },
            )
            .await
            .unwrap()
            .id()
    }

    type Outbound = mpsc::Receiver<Arc<ServerFrame>>;

    async fn authed(state: &Arc<AppState>, user: &str) -> (ConnectionHandler, Outbound) {
        authed_with_buffer(state, user, 8).await
    }

    async fn authed_with_buffer(
        state: &Arc<AppState>,
        user: &str,
        buffer: usize,
    ) -> (ConnectionHandler, Outbound) {
        let (tx, rx) = mpsc::channel(buffer);
        let mut handler = ConnectionHandler::new(Arc::clone(state), tx);
        let token = state.identity.issue(user).await.unwrap();
        let frames = handler
            .handle_frame(ClientFrame::Auth {
                data: AuthData { token },
            })
            .await;
        assert_eq!(frames[0].kind(), "auth:success");
        (handler, rx)
    }

    fn queued(rx: &mut Outbound) -> Vec<Arc<ServerFrame>> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn error_code(frame: &ServerFrame) -> &str {
        match frame {
            ServerFrame::Error { data, .. } => &data.code,
            other => panic!("Expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_requires_authentication() {
        let state = state().await;
        let event_id = event(&state, Visibility::Public).await;
        let (tx, _rx) = mpsc::channel(8);
        let mut handler = ConnectionHandler::new(Arc::clone(&state), tx);

        let frames = handler.handle_frame(ClientFrame::Join { event_id }).await;
        assert_eq!(error_code(&frames[0]), "UNAUTHORIZED");
        assert_eq!(state.rooms.subscriber_count(event_id), 0);

        let frames = handler
            .handle_frame(ClientFrame::Auth {
                data: AuthData {
                    token: "bogus".to_string(),
                },
            })
            .await;
        assert_eq!(error_code(&frames[0]), "UNAUTHORIZED");
        assert!(handler.user_id().is_none());
    }

    #[tokio::test]
    async fn test_join_replays_history_and_disconnect_cleans_up() {
        let state = state().await;
        let event_id = event(&state, Visibility::Public).await;
        for i in 0..25 {
            state
                .chat
                .post_message(event_id, "host", &format!("note {i}"))
                .await
                .unwrap();
        }

        let (mut handler, mut rx) = authed(&state, "alice").await;
        assert!(handler.handle_frame(ClientFrame::Join { event_id }).await.is_empty());
        let frames = queued(&mut rx);
        assert_eq!(*frames[0], ServerFrame::JoinSuccess { event_id });
        match &*frames[1] {
            ServerFrame::MessagesHistory { data, .. } => {
                assert_eq!(data.len(), 20);
                assert_eq!(data[0].body, "note 5");
                assert_eq!(data[19].body, "note 24");
            },
            other => panic!("Expected history, got {other:?}"),
        }
        assert!(state.rooms.is_subscribed(event_id, handler.connection_id()));

        handler.disconnect();
        assert_eq!(state.rooms.subscriber_count(event_id), 0);
    }

    #[tokio::test]
    async fn test_gated_room() {
        let state = state().await;
        let event_id = event(&state, Visibility::ApprovalRequired).await;
        let (mut handler, mut rx) = authed(&state, "alice").await;

        let frames = handler.handle_frame(ClientFrame::Join { event_id }).await;
        assert_eq!(error_code(&frames[0]), "FORBIDDEN");
        assert!(queued(&mut rx).is_empty());

        state
            .admission
            .set_rsvp(event_id, "alice", RsvpRequest::new(RsvpStatus::Going))
            .await
            .unwrap();
        handler.handle_frame(ClientFrame::Join { event_id }).await;
        assert_eq!(queued(&mut rx)[0].kind(), "join:success");
    }

    #[tokio::test]
    async fn test_typing_requires_subscription() {
        let state = state().await;
        let event_id = event(&state, Visibility::Public).await;
        let (mut handler, _rx) = authed(&state, "alice").await;

        let frames = handler.handle_frame(ClientFrame::Typing { event_id }).await;
        assert_eq!(error_code(&frames[0]), "FORBIDDEN");

        handler.handle_frame(ClientFrame::Join { event_id }).await;
        assert!(handler.handle_frame(ClientFrame::Typing { event_id }).await.is_empty());

        handler.handle_frame(ClientFrame::Leave { event_id }).await;
        assert!(!state.rooms.is_subscribed(event_id, handler.connection_id()));
    }

    #[tokio::test]
    async fn test_join_unknown_event() {
        let state = state().await;
        let (mut handler, _rx) = authed(&state, "alice").await;
        let frames = handler
            .handle_frame(ClientFrame::Join {
                event_id: Uuid::new_v4(),
            })
            .await;
        assert_eq!(error_code(&frames[0]), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_join_replies_precede_room_traffic() {
        let state = state().await;
        let event_id = event(&state, Visibility::Public).await;
        state.chat.post_message(event_id, "host", "before").await.unwrap();

        let (mut handler, mut rx) = authed(&state, "alice").await;
        handler.handle_frame(ClientFrame::Join { event_id }).await;
        state.chat.post_message(event_id, "host", "after").await.unwrap();

        let mut kinds = Vec::new();
        while kinds.len() < 3 {
            let frame = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let ServerFrame::MessageNew { data, .. } = &*frame {
                assert_eq!(data.body, "after");
            }
            kinds.push(frame.kind());
        }
        assert_eq!(kinds, vec!["join:success", "messages:history", "message:new"]);
    }

    #[tokio::test]
    async fn test_backlogged_connection_is_not_subscribed() {
        let state = state().await;
        let event_id = event(&state, Visibility::Public).await;
        let (mut handler, _rx) = authed_with_buffer(&state, "alice", 1).await;

        let frames = handler.handle_frame(ClientFrame::Join { event_id }).await;
        assert_eq!(error_code(&frames[0]), "OVERLOADED");
        assert!(!state.rooms.is_subscribed(event_id, handler.connection_id()));
    }
}
