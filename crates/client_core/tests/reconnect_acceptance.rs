use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use client_core::{
    EngineSnapshot, EngineUpdate, ReconciliationEngine, Settings, SubscriptionState, UserAction,
    WsTransport,
};
use serde_json::{json, Value};
use shared::{domain::MemberId, protocol::Frame};
use tokio::{net::TcpListener, sync::broadcast};

#[derive(Clone)]
struct Backend {
    received: Arc<Mutex<Vec<Frame>>>,
    push: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
}

impl Backend {
    fn new() -> Self {
        let (push, _) = broadcast::channel(16);
        let (kick, _) = broadcast::channel(4);
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            push,
            kick,
        }
    }

    fn count(&self, event: &str) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.event == event)
            .count()
    }
}

fn roster() -> Value {
    json!([
        { "_id": "u1", "username": "alice", "socketId": "s1", "status": "online" },
        { "_id": "u2", "username": "bob", "socketId": "s2", "status": "online" },
    ])
}

fn message(id: &str, second: u32) -> Value {
    json!({
        "_id": id,
        "content": format!("message {id}"),
        "sender": { "_id": "u2", "username": "bob" },
        "readBy": [],
        "createdAt": format!("2024-05-01T10:00:{second:02}Z"),
        "chatId": "c1",
    })
}

fn frame(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

async fn ws_handler(ws: WebSocketUpgrade, State(backend): State<Backend>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, backend))
}

async fn serve_socket(mut socket: WebSocket, backend: Backend) {
    let mut push = backend.push.subscribe();
    let mut kick = backend.kick.subscribe();
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(WsFrame::Text(text))) = incoming else {
                    return;
                };
                let Ok(received) = serde_json::from_str::<Frame>(&text) else {
                    continue;
                };
                let reply = (received.event == "user:join")
                    .then(|| frame("user:joined", json!({ "users": roster(), "messages": [] })));
                backend.received.lock().unwrap().push(received);
                if let Some(reply) = reply {
                    if socket.send(WsFrame::Text(reply)).await.is_err() {
                        return;
                    }
                }
            }
            Ok(text) = push.recv() => {
                if socket.send(WsFrame::Text(text)).await.is_err() {
                    return;
                }
            }
            _ = kick.recv() => return,
        }
    }
}

async fn spawn_backend(backend: Backend) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/users", get(|| async { Json(roster()) }))
        .route("/api/messages", get(|| async { Json(json!([])) }))
        .route(
            "/api/chats",
            post(|| async { Json(json!({ "chatId": "c1" })) }),
        )
        .route(
            "/api/chats/:chat_id/messages",
            get(|Path(_chat_id): Path<String>| async { Json(json!([message("m1", 1)])) }),
        )
        .route(
            "/api/chats/:chat_id/read",
            post(|Path(_chat_id): Path<String>| async { StatusCode::NO_CONTENT }),
        )
        .with_state(backend);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn wait_for(
    updates: &mut broadcast::Receiver<EngineUpdate>,
    what: &str,
    accept: impl Fn(&EngineSnapshot) -> bool,
) -> Arc<EngineSnapshot> {
    let wait = async {
        loop {
            match updates.recv().await {
                Ok(EngineUpdate::Snapshot(snapshot)) if accept(&snapshot) => return snapshot,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("engine stopped while waiting for {what}")
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

fn active_state(snapshot: &EngineSnapshot) -> Option<SubscriptionState> {
    snapshot.active.as_ref().map(|active| active.state)
}

#[tokio::test]
async fn conversation_survives_a_dropped_connection() {
    let backend = Backend::new();
    let server_url = spawn_backend(backend.clone()).await;
    let settings = Settings {
        server_url,
        reconnect_delay_ms: 50,
        ..Settings::default()
    };

    let (transport, _transport_task) = WsTransport::connect(&settings).expect("transport");
    let (engine, _engine_task) = ReconciliationEngine::new(transport, settings).spawn();
    let mut updates = engine.subscribe();

    engine
        .dispatch(UserAction::Join {
            username: "alice".into(),
        })
        .await
        .expect("join");
    let snapshot = wait_for(&mut updates, "session to resolve", |s| {
        s.connected && s.self_id.is_some()
    })
    .await;
    assert_eq!(snapshot.self_id, Some(MemberId::from("u1")));

    engine
        .dispatch(UserAction::SelectPeer {
            peer: MemberId::from("u2"),
        })
        .await
        .expect("select bob");
    wait_for(&mut updates, "conversation to join", |s| {
        active_state(s) == Some(SubscriptionState::Joined)
    })
    .await;

    backend
        .push
        .send(frame("message:new", message("m2", 2)))
        .expect("push");
    let snapshot = wait_for(&mut updates, "pushed message", |s| {
        s.active.as_ref().is_some_and(|a| a.messages.len() == 2)
    })
    .await;
    let peer = snapshot.peers.iter().find(|p| p.member.username == "bob").expect("bob");
    assert_eq!(peer.unread, 1);

    backend.kick.send(()).expect("kick");
    wait_for(&mut updates, "disconnect", |s| {
        !s.connected && active_state(s) == Some(SubscriptionState::Disconnected)
    })
    .await;

    let snapshot = wait_for(&mut updates, "rejoin after reconnect", |s| {
        s.connected && active_state(s) == Some(SubscriptionState::Joined)
    })
    .await;
    let active = snapshot.active.as_ref().expect("active");
    let ids: Vec<_> = active.messages.iter().map(|m| m.message.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2"]);
    assert!(backend.count("user:join") >= 2);
    assert_eq!(backend.count("chat:join"), 2);
}
