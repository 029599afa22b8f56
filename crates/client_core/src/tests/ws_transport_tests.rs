use super::*;
use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::{domain::ConversationId, protocol::CreateChatRequest};
use tokio::net::TcpListener;

async fn spawn_api_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route(
            "/api/chats",
            post(|Json(req): Json<CreateChatRequest>| async move {
                Json(json!({ "chatId": format!("chat-{}-{}", req.user_id1, req.user_id2) }))
            }),
        )
        .route(
            "/api/chats/:chat_id/read",
            post(|Path(_chat_id): Path<String>| async { StatusCode::NO_CONTENT }),
        )
        .route(
            "/api/users",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn settings_for(server_url: String) -> Settings {
    Settings {
        server_url,
        ..Settings::default()
    }
}

#[tokio::test]
async fn request_posts_json_and_decodes_response() {
    let server_url = spawn_api_server().await;
    let (transport, _outbound) = WsTransport::build(&settings_for(server_url)).expect("build");

    let value = transport
        .request(
            Method::POST,
            "/api/chats",
            Some(json!({ "userId1": "u1", "userId2": "u2" })),
        )
        .await
        .expect("create chat");
    assert_eq!(value, json!({ "chatId": "chat-u1-u2" }));
}

#[tokio::test]
async fn empty_ack_body_decodes_to_null() {
    let server_url = spawn_api_server().await;
    let (transport, _outbound) = WsTransport::build(&settings_for(server_url)).expect("build");

    let value = transport
        .request(
            Method::POST,
            "/api/chats/c1/read",
            Some(json!({ "userId": "u1" })),
        )
        .await
        .expect("ack");
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn non_success_status_is_request_failed() {
    let server_url = spawn_api_server().await;
    let (transport, _outbound) = WsTransport::build(&settings_for(server_url)).expect("build");

    let err = transport
        .request(Method::GET, "/api/users", None)
        .await
        .expect_err("500 must fail");
    assert!(matches!(err, EngineError::RequestFailed { ref path, .. } if path == "/api/users"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn send_is_refused_while_disconnected() {
    let (transport, mut outbound) =
        WsTransport::build(&Settings::default()).expect("build");

    let err = transport
        .send(&ClientEvent::ChatJoin(ConversationId::from("c1")))
        .expect_err("not connected");
    assert_eq!(err, EngineError::TransportUnavailable { event: "chat:join" });
    assert!(outbound.try_recv().is_err());
}

#[tokio::test]
async fn send_writes_envelope_frame_when_connected() {
    let (transport, mut outbound) =
        WsTransport::build(&Settings::default()).expect("build");
    transport.set_connected(true);

    transport
        .send(&ClientEvent::UserTyping(true))
        .expect("send");
    let frame = outbound.try_recv().expect("frame queued");
    let decoded: Frame = serde_json::from_str(&frame).expect("frame json");
    assert_eq!(decoded.event, "user:typing");
    assert_eq!(decoded.data, json!(true));
}

#[tokio::test]
async fn connection_changes_are_published_once() {
    let (transport, _outbound) = WsTransport::build(&Settings::default()).expect("build");
    let mut rx = transport.subscribe();

    transport.set_connected(true);
    transport.set_connected(true);
    transport.set_connected(false);

    assert_eq!(rx.recv().await.expect("first"), TransportNotification::Connected);
    assert_eq!(
        rx.recv().await.expect("second"),
        TransportNotification::Disconnected
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn incoming_frames_become_named_events() {
    let (transport, _outbound) = WsTransport::build(&Settings::default()).expect("build");
    let mut rx = transport.subscribe();

    transport.publish_frame("not json");
    transport.publish_frame(r#"{"event":"user:typing","data":{"username":"bob","isTyping":true}}"#);

    assert_eq!(
        rx.recv().await.expect("event"),
        TransportNotification::Event {
            name: "user:typing".to_string(),
            data: json!({ "username": "bob", "isTyping": true }),
        }
    );
}
