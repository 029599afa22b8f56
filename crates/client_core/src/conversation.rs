//! Sequences are ordered by (created_at, id) and hold one entry per message id.

use std::{cell::RefCell, collections::HashMap};

use shared::{
    domain::{ConversationId, MemberId, MessageId},
    protocol::Message,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unjoined,
    Joining,
    Joined,
    Left,
    Disconnected,
}

impl SubscriptionState {
    /// States from which a select-peer action (re)subscribes.
    pub fn needs_join(self) -> bool {
        matches!(self, Self::Unjoined | Self::Left | Self::Disconnected)
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    id: ConversationId,
    remote_id: Option<ConversationId>,
    participants: (MemberId, MemberId),
    messages: Vec<Message>,
    state: SubscriptionState,
    unread_memo: RefCell<HashMap<(MemberId, MemberId), usize>>,
}

impl Conversation {
    fn new(a: &MemberId, b: &MemberId) -> Self {
        let participants = if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        Self {
            id: ConversationId::for_pair(a, b),
            remote_id: None,
            participants,
            messages: Vec::new(),
            state: SubscriptionState::default(),
            unread_memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn remote_id(&self) -> Option<&ConversationId> {
        self.remote_id.as_ref()
    }

    pub fn participants(&self) -> (&MemberId, &MemberId) {
        (&self.participants.0, &self.participants.1)
    }

    pub fn peer_of(&self, me: &MemberId) -> &MemberId {
        if &self.participants.0 == me {
            &self.participants.1
        } else {
            &self.participants.0
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Joined
    }

    pub fn unread_count_for(&self, owner: &MemberId, other: &MemberId) -> usize {
        let key = (owner.clone(), other.clone());
        if let Some(count) = self.unread_memo.borrow().get(&key) {
            return *count;
        }
        let count = count_unread(&self.messages, owner, other);
        self.unread_memo.borrow_mut().insert(key, count);
        count
    }

    fn merge(&mut self, message: Message) -> bool {
        let changed = merge_message(&mut self.messages, message);
        if changed {
            self.unread_memo.get_mut().clear();
        }
        changed
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, Conversation>,
    remote_index: HashMap<ConversationId, ConversationId>,
    feed: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure(&mut self, self_id: &MemberId, peer_id: &MemberId) -> ConversationId {
        let id = ConversationId::for_pair(self_id, peer_id);
        self.conversations
            .entry(id.clone())
            .or_insert_with(|| Conversation::new(self_id, peer_id));
        id
    }

    /// Records the backend's id for a conversation. Both ids resolve afterwards.
    pub fn bind_remote(&mut self, id: &ConversationId, remote_id: ConversationId) -> bool {
        let Some(local) = self.resolve(id).cloned() else {
            debug!(conversation = %id, "conversations: bind for unknown conversation ignored");
            return false;
        };
        if let Some(bound) = self.remote_index.get(&remote_id) {
            if bound != &local {
                warn!(
                    remote = %remote_id,
                    bound = %bound,
                    requested = %local,
                    "conversations: remote id already bound to another conversation"
                );
                return false;
            }
        }
        if let Some(conversation) = self.conversations.get_mut(&local) {
            if let Some(previous) = conversation.remote_id.replace(remote_id.clone()) {
                if previous != remote_id {
                    self.remote_index.remove(&previous);
                }
            }
        }
        self.remote_index.insert(remote_id, local);
        true
    }

    pub fn resolve(&self, id: &ConversationId) -> Option<&ConversationId> {
        if let Some((key, _)) = self.conversations.get_key_value(id) {
            return Some(key);
        }
        self.remote_index.get(id)
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        let local = self.resolve(id)?;
        self.conversations.get(local)
    }

    fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        let local = self.resolve(id)?.clone();
        self.conversations.get_mut(&local)
    }

    pub fn between(&self, a: &MemberId, b: &MemberId) -> Option<&Conversation> {
        self.conversations.get(&ConversationId::for_pair(a, b))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    pub fn load_history(
        &mut self,
        id: &ConversationId,
        messages: impl IntoIterator<Item = Message>,
    ) -> usize {
        let Some(conversation) = self.get_mut(id) else {
            debug!(conversation = %id, "conversations: history for unknown conversation ignored");
            return 0;
        };
        let mut changed = 0;
        for message in messages {
            if conversation.merge(message) {
                changed += 1;
            }
        }
        changed
    }

    pub fn append_pushed(&mut self, id: &ConversationId, message: Message) -> bool {
        match self.get_mut(id) {
            Some(conversation) => conversation.merge(message),
            None => {
                debug!(conversation = %id, "conversations: push for unknown conversation ignored");
                false
            }
        }
    }

    /// Adds `reader` to the read-by set of every message it did not author.
    pub fn mark_read(&mut self, id: &ConversationId, reader: &MemberId) -> usize {
        let Some(conversation) = self.get_mut(id) else {
            return 0;
        };
        let mut marked = 0;
        for message in conversation
            .messages
            .iter_mut()
            .filter(|message| &message.sender.id != reader)
        {
            if message.read_by.insert(reader.clone()) {
                marked += 1;
            }
        }
        if marked > 0 {
            conversation.unread_memo.get_mut().clear();
        }
        marked
    }

    pub fn unread_count_for(
        &self,
        id: &ConversationId,
        owner: &MemberId,
        other: &MemberId,
    ) -> usize {
        self.get(id)
            .map(|conversation| conversation.unread_count_for(owner, other))
            .unwrap_or(0)
    }

    pub fn set_state(
        &mut self,
        id: &ConversationId,
        state: SubscriptionState,
    ) -> Option<SubscriptionState> {
        let conversation = self.get_mut(id)?;
        Some(std::mem::replace(&mut conversation.state, state))
    }

    pub fn ids_in_state(&self, state: SubscriptionState) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = self
            .conversations
            .values()
            .filter(|conversation| conversation.state == state)
            .map(|conversation| conversation.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn merge_feed(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut changed = 0;
        for message in messages {
            if merge_message(&mut self.feed, message) {
                changed += 1;
            }
        }
        changed
    }

    pub fn feed(&self) -> &[Message] {
        &self.feed
    }

    pub fn remove_message(&mut self, message_id: &MessageId) -> bool {
        let mut removed = remove_from(&mut self.feed, message_id);
        for conversation in self.conversations.values_mut() {
            if remove_from(&mut conversation.messages, message_id) {
                conversation.unread_memo.get_mut().clear();
                removed = true;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.remote_index.clear();
        self.feed.clear();
    }
}

fn merge_message(sequence: &mut Vec<Message>, incoming: Message) -> bool {
    let merged = match sequence.iter().position(|m| m.id == incoming.id) {
        Some(index) => {
            let existing = &sequence[index];
            let mut read_by = existing.read_by.clone();
            read_by.extend(incoming.read_by.iter().cloned());
            let merged = Message {
                read_by,
                updated_at: incoming.updated_at.or(existing.updated_at),
                chat_id: incoming.chat_id.clone().or_else(|| existing.chat_id.clone()),
                ..incoming
            };
            if &merged == existing {
                return false;
            }
            sequence.remove(index);
            merged
        }
        None => incoming,
    };
    let position = sequence.partition_point(|m| m.order_key() < merged.order_key());
    sequence.insert(position, merged);
    true
}

fn remove_from(sequence: &mut Vec<Message>, message_id: &MessageId) -> bool {
    let before = sequence.len();
    sequence.retain(|message| &message.id != message_id);
    sequence.len() != before
}

/// Messages from `other` that `owner` has not read, counted from scratch.
fn count_unread(messages: &[Message], owner: &MemberId, other: &MemberId) -> usize {
    messages
        .iter()
        .filter(|message| &message.sender.id == other && !message.is_read_by(owner))
        .count()
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
