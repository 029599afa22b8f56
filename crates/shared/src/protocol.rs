use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    domain::{ConversationId, MemberId, MemberStatus, MessageId},
    error::ProtocolError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(rename = "_id")]
    pub id: MemberId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
}

impl Member {
    pub fn is_online(&self) -> bool {
        self.status == MemberStatus::Online
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRef {
    #[serde(rename = "_id")]
    pub id: MemberId,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub content: String,
    pub sender: SenderRef,
    #[serde(default)]
    pub read_by: BTreeSet<MemberId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ConversationId>,
}

impl Message {
    pub fn order_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.created_at, &self.id)
    }

    pub fn is_read_by(&self, member: &MemberId) -> bool {
        self.read_by.contains(member)
    }
}

/// Events the client pushes over the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "user:join")]
    UserJoin(String),
    #[serde(rename = "chat:join")]
    ChatJoin(ConversationId),
    #[serde(rename = "message:send", rename_all = "camelCase")]
    MessageSend {
        chat_id: ConversationId,
        content: String,
    },
    #[serde(rename = "user:typing")]
    UserTyping(bool),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserJoin(_) => "user:join",
            Self::ChatJoin(_) => "chat:join",
            Self::MessageSend { .. } => "message:send",
            Self::UserTyping(_) => "user:typing",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedSnapshot {
    #[serde(default)]
    pub users: Vec<Member>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// `users:update` carries the full roster; a lone member object is an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RosterUpdate {
    Full(Vec<Member>),
    Single(Member),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub username: String,
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ConversationId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeftPayload {
    #[serde(default)]
    pub users: Vec<Member>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<MemberId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRemoved {
    pub user_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: MessageId,
}

pub const SERVER_EVENT_NAMES: &[&str] = &[
    "user:joined",
    "users:update",
    "user:typing",
    "user:left",
    "message:new",
    "user:removed",
    "message:deleted",
];

/// Events the server pushes over the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "user:joined")]
    UserJoined(JoinedSnapshot),
    #[serde(rename = "users:update")]
    UsersUpdate(RosterUpdate),
    #[serde(rename = "user:typing")]
    UserTyping(TypingPayload),
    #[serde(rename = "user:left")]
    UserLeft(LeftPayload),
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "user:removed")]
    UserRemoved(MemberRemoved),
    #[serde(rename = "message:deleted")]
    MessageDeleted(MessageDeleted),
}

impl ServerEvent {
    pub fn decode(name: &str, data: Value) -> Result<Self, ProtocolError> {
        if !SERVER_EVENT_NAMES.contains(&name) {
            return Err(ProtocolError::UnknownEvent(name.to_string()));
        }
        serde_json::from_value(json!({ "event": name, "data": data })).map_err(|source| {
            ProtocolError::InvalidPayload {
                event: name.to_string(),
                source,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub user_id1: MemberId,
    pub user_id2: MemberId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatResponse {
    pub chat_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub user_id: MemberId,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
