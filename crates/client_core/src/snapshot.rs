use std::sync::Arc;

use shared::{
    domain::{ConversationId, MemberId},
    protocol::{Member, Message},
};

use crate::{conversation::SubscriptionState, error::EngineError};

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    pub is_own: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerView {
    pub member: Member,
    pub unread: usize,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConversationView {
    pub id: ConversationId,
    pub remote_id: Option<ConversationId>,
    pub peer_id: MemberId,
    pub peer: Option<Member>,
    pub state: SubscriptionState,
    pub messages: Vec<MessageView>,
    pub typing: Vec<String>,
}

impl ActiveConversationView {
    pub fn typing_summary(&self) -> Option<String> {
        match self.typing.as_slice() {
            [] => None,
            [one] => Some(format!("{one} is typing...")),
            many => Some(format!("{} are typing...", many.join(", "))),
        }
    }
}

/// Everything the view layer needs to paint one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSnapshot {
    pub username: Option<String>,
    pub self_id: Option<MemberId>,
    pub connected: bool,
    pub peers: Vec<PeerView>,
    pub active: Option<ActiveConversationView>,
    pub feed: Vec<Message>,
    pub last_error: Option<EngineError>,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    Snapshot(Arc<EngineSnapshot>),
    ScrollToLatest(ConversationId),
    Error(EngineError),
}
