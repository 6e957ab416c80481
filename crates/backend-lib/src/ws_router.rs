// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! Router and WebSocket connection loop.
use crate::handlers;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION};
use crate::websocket::ConnectionHandler;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use eventroom_common::{ClientFrame, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .merge(handlers::events::routes());
    if state.settings.dev_token_issuer {
        tracing::warn!("development token issuer enabled on POST /tokens");
        router = router.merge(handlers::events::token_routes());
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": state.rooms.room_count(),
    }))
}

/// Handler for WebSocket connections
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);

    let (mut sink, mut stream) = socket.split();

    // Outbound queue shared by room broadcasts and direct replies
    let (tx, mut rx) = mpsc::channel::<Arc<ServerFrame>>(state.settings.outbound_buffer);
    let mut handler = ConnectionHandler::new(Arc::clone(&state), tx.clone());

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&*frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("failed to serialize {}: {e}", frame.kind());
                    continue;
                },
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    'recv: while let Some(Ok(message)) = stream.next().await {
        let replies = match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(frame) => handler.handle_frame(frame).await,
                Err(e) => vec![ServerFrame::error(
                    None,
                    "VALIDATION_ERROR",
                    format!("Malformed frame: {e}"),
                )],
            },
            Message::Close(_) => break,
            _ => continue,
        };

        for reply in replies {
            // The send task is gone once the socket can no longer be written
            if tx.send(Arc::new(reply)).await.is_err() {
                break 'recv;
            }
        }
    }

    handler.disconnect();
    gauge!(WS_ACTIVE).decrement(1.0);
    send_task.abort();
}
