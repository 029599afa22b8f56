use super::*;

fn member_json(id: &str, username: &str) -> Value {
    json!({
        "_id": id,
        "username": username,
        "socketId": "sock-1",
        "isOnline": true,
        "status": "online",
        "lastSeen": "2024-01-01T00:00:00Z",
        "lastActive": "2024-01-01T00:00:00Z"
    })
}

fn message_json(id: &str, chat_id: Option<&str>) -> Value {
    let mut value = json!({
        "_id": id,
        "content": "hello",
        "sender": { "_id": "u2", "username": "bob" },
        "readBy": ["u2"],
        "createdAt": "2024-01-01T00:00:05Z",
        "updatedAt": "2024-01-01T00:00:05Z"
    });
    if let Some(chat_id) = chat_id {
        value["chatId"] = json!(chat_id);
    }
    value
}

#[test]
fn client_events_serialize_as_named_envelopes() {
    let join = serde_json::to_value(ClientEvent::UserJoin("alice".to_string())).expect("join");
    assert_eq!(join, json!({ "event": "user:join", "data": "alice" }));

    let send = serde_json::to_value(ClientEvent::MessageSend {
        chat_id: ConversationId::from("c1"),
        content: "hi".to_string(),
    })
    .expect("send");
    assert_eq!(
        send,
        json!({ "event": "message:send", "data": { "chatId": "c1", "content": "hi" } })
    );

    let typing = serde_json::to_value(ClientEvent::UserTyping(true)).expect("typing");
    assert_eq!(typing, json!({ "event": "user:typing", "data": true }));
    assert_eq!(ClientEvent::ChatJoin(ConversationId::from("c1")).name(), "chat:join");
}

#[test]
fn decodes_joined_snapshot_and_ignores_unknown_member_fields() {
    let event = ServerEvent::decode(
        "user:joined",
        json!({ "users": [member_json("u1", "alice")], "messages": [message_json("m1", None)] }),
    )
    .expect("decode");

    let ServerEvent::UserJoined(snapshot) = event else {
        panic!("unexpected event: {event:?}");
    };
    assert_eq!(snapshot.users.len(), 1);
    assert_eq!(snapshot.users[0].status, MemberStatus::Online);
    assert_eq!(snapshot.users[0].socket_id.as_deref(), Some("sock-1"));
    assert_eq!(snapshot.messages[0].sender.id, MemberId::from("u2"));
    assert!(snapshot.messages[0].is_read_by(&MemberId::from("u2")));
    assert!(snapshot.messages[0].chat_id.is_none());
}

#[test]
fn roster_update_accepts_array_or_single_member() {
    let full = ServerEvent::decode("users:update", json!([member_json("u1", "alice")]))
        .expect("full roster");
    assert!(matches!(
        full,
        ServerEvent::UsersUpdate(RosterUpdate::Full(ref members)) if members.len() == 1
    ));

    let single =
        ServerEvent::decode("users:update", member_json("u2", "bob")).expect("single member");
    assert!(matches!(
        single,
        ServerEvent::UsersUpdate(RosterUpdate::Single(ref member)) if member.username == "bob"
    ));
}

#[test]
fn typing_and_left_payloads_tolerate_missing_optional_fields() {
    let typing = ServerEvent::decode("user:typing", json!({ "username": "bob", "isTyping": true }))
        .expect("typing");
    assert_eq!(
        typing,
        ServerEvent::UserTyping(TypingPayload {
            username: "bob".to_string(),
            is_typing: true,
            chat_id: None,
        })
    );

    let left = ServerEvent::decode("user:left", json!({ "userId": "u1" })).expect("left");
    assert_eq!(
        left,
        ServerEvent::UserLeft(LeftPayload {
            users: Vec::new(),
            user_id: Some(MemberId::from("u1")),
        })
    );
}

#[test]
fn message_new_keeps_chat_id() {
    let event = ServerEvent::decode("message:new", message_json("m9", Some("c7"))).expect("decode");
    let ServerEvent::MessageNew(message) = event else {
        panic!("unexpected event: {event:?}");
    };
    assert_eq!(message.chat_id, Some(ConversationId::from("c7")));
    assert_eq!(message.id, MessageId::from("m9"));
}

#[test]
fn distinguishes_unknown_events_from_malformed_payloads() {
    let unknown = ServerEvent::decode("presence:ping", json!({})).expect_err("unknown");
    assert!(unknown.is_unknown_event());

    let malformed =
        ServerEvent::decode("message:new", json!({ "content": "no id" })).expect_err("malformed");
    assert!(!malformed.is_unknown_event());
    assert!(malformed.to_string().contains("message:new"));
}

#[test]
fn conversation_id_for_pair_is_order_independent() {
    let a = MemberId::from("u1");
    let b = MemberId::from("u2");
    assert_eq!(ConversationId::for_pair(&a, &b), ConversationId::for_pair(&b, &a));
    assert_ne!(
        ConversationId::for_pair(&a, &b),
        ConversationId::for_pair(&a, &MemberId::from("u3"))
    );
}

#[test]
fn rest_dtos_use_backend_field_names() {
    let body = serde_json::to_value(CreateChatRequest {
        user_id1: MemberId::from("u1"),
        user_id2: MemberId::from("u2"),
    })
    .expect("request");
    assert_eq!(body, json!({ "userId1": "u1", "userId2": "u2" }));

    let response: CreateChatResponse =
        serde_json::from_value(json!({ "chatId": "c1" })).expect("response");
    assert_eq!(response.chat_id, ConversationId::from("c1"));
}
