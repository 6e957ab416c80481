//! End-to-end tests over a real socket.

mod common;

use eventroom_backend::{admission::RsvpRequest, ws_router::create_router, AppState};
use eventroom_common::{AuthData, ClientFrame, RsvpStatus, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_server() -> (SocketAddr, Arc<AppState>) {
    let state = common::memory_state();
    let app = create_router(Arc::clone(&state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("Failed to connect");
    client
}

async fn send(client: &mut Client, frame: &ClientFrame) {
    let json = serde_json::to_string(frame).unwrap();
    client.send(Message::Text(json.into())).await.unwrap();
}

async fn next_frame(client: &mut Client) -> ServerFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn authenticate(client: &mut Client, state: &AppState, user: &str) {
    let token = state.identity.issue(user).await.unwrap();
    send(client, &ClientFrame::Auth { data: AuthData { token } }).await;
    match next_frame(client).await {
        ServerFrame::AuthSuccess { data } => assert_eq!(data.user_id, user),
        other => panic!("Expected auth:success, got {other:?}"),
    }
}

fn error_code(frame: &ServerFrame) -> String {
    match frame {
        ServerFrame::Error { data, .. } => data.code.clone(),
        other => panic!("Expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_room_session_over_socket() {
    let (addr, state) = setup_server().await;
    let event_id = common::create_event(&state, Some(10)).await;
    state
        .chat
        .post_message(event_id, "organizer", "doors open at 7")
        .await
        .unwrap();

    let mut alice = connect(addr).await;

    // Unauthenticated join is refused
    send(&mut alice, &ClientFrame::Join { event_id }).await;
    assert_eq!(error_code(&next_frame(&mut alice).await), "UNAUTHORIZED");

    // Garbage is answered, not fatal
    alice
        .send(Message::Text("{\"type\":\"shout\"}".into()))
        .await
        .unwrap();
    assert_eq!(error_code(&next_frame(&mut alice).await), "VALIDATION_ERROR");

    authenticate(&mut alice, &state, "alice").await;
    send(&mut alice, &ClientFrame::Join { event_id }).await;
    assert_eq!(next_frame(&mut alice).await, ServerFrame::JoinSuccess { event_id });
    match next_frame(&mut alice).await {
        ServerFrame::MessagesHistory { data, .. } => {
            assert_eq!(data.len(), 1);
            assert_eq!(data[0].body, "doors open at 7");
        },
        other => panic!("Expected history, got {other:?}"),
    }

    let mut bob = connect(addr).await;
    authenticate(&mut bob, &state, "bob").await;
    send(&mut bob, &ClientFrame::Join { event_id }).await;
    next_frame(&mut bob).await;
    next_frame(&mut bob).await;

    // Typing is relayed to everyone but the typist
    send(&mut bob, &ClientFrame::Typing { event_id }).await;
    match next_frame(&mut alice).await {
        ServerFrame::Typing { data, .. } => assert_eq!(data.user_id, "bob"),
        other => panic!("Expected typing, got {other:?}"),
    }

    state
        .admission
        .set_rsvp(event_id, "bob", RsvpRequest::new(RsvpStatus::Going))
        .await
        .unwrap();
    for client in [&mut alice, &mut bob] {
        match next_frame(client).await {
            ServerFrame::RsvpUpdate { data, .. } => {
                assert_eq!(data.user_id, "bob");
                assert_eq!(data.status, RsvpStatus::Going);
            },
            other => panic!("Expected rsvp:update, got {other:?}"),
        }
    }

    // Closing the socket drops the subscription
    bob.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.rooms.subscriber_count(event_id) != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription was not removed on disconnect");
}
