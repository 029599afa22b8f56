use std::{collections::HashSet, future::Future, sync::Arc, time::Instant};

use anyhow::anyhow;
use chrono::Utc;
use serde_json::Value;
use shared::{
    domain::{ConversationId, MemberId, MessageId},
    protocol::{
        ClientEvent, JoinedSnapshot, LeftPayload, Member, Message, RosterUpdate, ServerEvent,
        TypingPayload,
    },
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    api::RestApi,
    config::Settings,
    conversation::{ConversationStore, SubscriptionState},
    error::EngineError,
    presence::PresenceStore,
    snapshot::{ActiveConversationView, EngineSnapshot, EngineUpdate, MessageView, PeerView},
    transport::{Transport, TransportNotification},
    typing::TypingTracker,
};

const ACTION_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Join { username: String },
    SelectPeer { peer: MemberId },
    SendMessage { content: String },
    /// Input focus (`true`) or blur (`false`).
    SetTyping(bool),
    MarkRead,
    CloseConversation,
    RemoveMember { id: MemberId },
    RemoveMessage { id: MessageId },
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    /// Stable roster id, resolved by username once the roster contains us.
    pub member_id: Option<MemberId>,
    pub active: Option<ConversationId>,
    bootstrapped: bool,
}

impl Session {
    fn new(username: String) -> Self {
        Self {
            username,
            member_id: None,
            active: None,
            bootstrapped: false,
        }
    }
}

#[derive(Debug)]
enum Completion {
    ChatCreated {
        conversation: ConversationId,
        result: Result<ConversationId, EngineError>,
    },
    HistoryLoaded {
        conversation: ConversationId,
        result: Result<Vec<Message>, EngineError>,
    },
    ReadAcknowledged {
        conversation: ConversationId,
        result: Result<(), EngineError>,
    },
    RosterFetched(Result<Vec<Member>, EngineError>),
    FeedFetched(Result<Vec<Message>, EngineError>),
    MemberRemoved {
        member: MemberId,
        result: Result<(), EngineError>,
    },
    MessageRemoved {
        message: MessageId,
        result: Result<(), EngineError>,
    },
}

#[derive(Clone)]
pub struct EngineHandle {
    actions: mpsc::Sender<UserAction>,
    updates: broadcast::Sender<EngineUpdate>,
}

impl EngineHandle {
    pub async fn dispatch(&self, action: UserAction) -> anyhow::Result<()> {
        self.actions
            .send(action)
            .await
            .map_err(|_| anyhow!("reconciliation engine has stopped"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates.subscribe()
    }
}

pub struct ReconciliationEngine {
    settings: Settings,
    transport: Arc<dyn Transport>,
    api: RestApi,
    session: Option<Session>,
    presence: PresenceStore,
    conversations: ConversationStore,
    typing: TypingTracker,
    connected: bool,
    last_error: Option<EngineError>,
    in_flight: usize,
    creating: HashSet<ConversationId>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: Option<mpsc::UnboundedReceiver<Completion>>,
    updates: broadcast::Sender<EngineUpdate>,
}

impl ReconciliationEngine {
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(settings.update_buffer.max(1));
        Self {
            api: RestApi::new(Arc::clone(&transport), settings.request_timeout()),
            typing: TypingTracker::new(settings.typing_ttl()),
            settings,
            transport,
            session: None,
            presence: PresenceStore::new(),
            conversations: ConversationStore::new(),
            connected: false,
            last_error: None,
            in_flight: 0,
            creating: HashSet::new(),
            completion_tx,
            completion_rx: Some(completion_rx),
            updates,
        }
    }

    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (actions, actions_rx) = mpsc::channel(ACTION_BUFFER);
        let handle = EngineHandle {
            actions,
            updates: self.updates.clone(),
        };
        (handle, tokio::spawn(self.run(actions_rx)))
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates.subscribe()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub async fn run(mut self, mut actions: mpsc::Receiver<UserAction>) {
        let Some(mut completions) = self.completion_rx.take() else {
            warn!("engine: completion channel already taken");
            return;
        };
        let mut notifications = self.transport.subscribe();
        let mut sweep = tokio::time::interval(self.settings.typing_sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.sync_connection() {
            self.publish();
        }

        loop {
            tokio::select! {
                notification = notifications.recv() => match notification {
                    Ok(notification) => self.handle_notification(notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => self.recover_from_lag(skipped),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(completion) = completions.recv() => self.apply_completion(completion),
                action = actions.recv() => match action {
                    Some(action) => {
                        if let Err(err) = self.handle_action(action) {
                            debug!(%err, "engine: action refused");
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => self.sweep_typing(Instant::now()),
            }
        }
        info!("engine: stopped");
    }

    /// Skipped notifications may include connection edges, so the connection
    /// state is re-read from the transport before the active conversation is
    /// re-pulled.
    pub fn recover_from_lag(&mut self, skipped: u64) {
        warn!(skipped, "engine: transport notifications lagged");
        let was_connected = self.connected;
        self.sync_connection();
        if was_connected && self.connected {
            self.resync_active();
        }
        self.publish();
    }

    /// Applies request completions until none are outstanding.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            let Some(completions) = self.completion_rx.as_mut() else {
                return;
            };
            match completions.recv().await {
                Some(completion) => self.apply_completion(completion),
                None => return,
            }
        }
    }

    pub fn handle_notification(&mut self, notification: TransportNotification) {
        match notification {
            TransportNotification::Connected => self.on_connected(),
            TransportNotification::Disconnected => self.on_disconnected(),
            TransportNotification::Event { name, data } => self.dispatch(&name, data),
        }
        self.publish();
    }

    pub fn handle_action(&mut self, action: UserAction) -> Result<(), EngineError> {
        let result = match action {
            UserAction::Join { username } => {
                self.start_session(username);
                Ok(())
            }
            UserAction::SelectPeer { peer } => self.select_peer(peer),
            UserAction::SendMessage { content } => self.send_message(content),
            UserAction::SetTyping(is_typing) => self.announce_typing(is_typing),
            UserAction::MarkRead => self.mark_active_read(),
            UserAction::CloseConversation => {
                self.close_active();
                Ok(())
            }
            UserAction::RemoveMember { id } => self.remove_member(id),
            UserAction::RemoveMessage { id } => self.remove_message(id),
            UserAction::Leave => {
                self.end_session();
                Ok(())
            }
        };
        self.publish();
        result
    }

    pub fn sweep_typing(&mut self, now: Instant) {
        if self.typing.sweep(now) > 0 {
            self.publish();
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let self_id = self.self_id();
        let username = self.session.as_ref().map(|s| s.username.clone());
        let active_id = self.active_id();
        let now = Instant::now();

        let active = active_id.and_then(|id| {
            let conversation = self.conversations.get(id)?;
            let peer_id = match &self_id {
                Some(me) => conversation.peer_of(me).clone(),
                None => conversation.participants().1.clone(),
            };
            Some(ActiveConversationView {
                id: conversation.id().clone(),
                remote_id: conversation.remote_id().cloned(),
                peer: self.presence.get(&peer_id).cloned(),
                peer_id,
                state: conversation.state(),
                messages: conversation
                    .messages()
                    .iter()
                    .map(|message| MessageView {
                        is_own: self_id.as_ref() == Some(&message.sender.id),
                        message: message.clone(),
                    })
                    .collect(),
                typing: self.typing.list_typing(id, username.as_deref(), now),
            })
        });

        let peers = self
            .presence
            .list()
            .into_iter()
            .filter(|member| self_id.as_ref() != Some(&member.id))
            .map(|member| {
                let unread = match &self_id {
                    Some(me) => self
                        .conversations
                        .between(me, &member.id)
                        .map(|conversation| conversation.unread_count_for(me, &member.id))
                        .unwrap_or(0),
                    None => 0,
                };
                PeerView {
                    member: member.clone(),
                    unread,
                    selected: active.as_ref().map(|a| &a.peer_id) == Some(&member.id),
                }
            })
            .collect();

        EngineSnapshot {
            username,
            self_id,
            connected: self.connected,
            peers,
            active,
            feed: self.conversations.feed().to_vec(),
            last_error: self.last_error.clone(),
        }
    }

    fn self_id(&self) -> Option<MemberId> {
        self.session.as_ref().and_then(|s| s.member_id.clone())
    }

    fn active_id(&self) -> Option<&ConversationId> {
        self.session.as_ref().and_then(|s| s.active.as_ref())
    }

    fn publish(&self) {
        if self.updates.receiver_count() == 0 {
            return;
        }
        let _ = self
            .updates
            .send(EngineUpdate::Snapshot(Arc::new(self.snapshot())));
    }

    fn report(&mut self, err: EngineError) {
        warn!(%err, retryable = err.is_retryable(), "engine: request failed");
        self.last_error = Some(err.clone());
        let _ = self.updates.send(EngineUpdate::Error(err));
    }

    fn emit(&self, event: ClientEvent) -> Result<(), EngineError> {
        if !self.connected {
            let err = EngineError::TransportUnavailable {
                event: event.name(),
            };
            warn!(%err, "engine: dropping outgoing event while disconnected");
            return Err(err);
        }
        self.transport.send(&event).map_err(|err| {
            warn!(%err, "engine: transport refused outgoing event");
            err
        })
    }

    fn spawn_request<F>(&mut self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let _ = completions.send(request.await);
        });
    }

    // --- connection lifecycle -------------------------------------------------

    /// Applies a missed connection edge. Returns whether anything changed.
    fn sync_connection(&mut self) -> bool {
        match (self.transport.is_connected(), self.connected) {
            (true, false) => self.on_connected(),
            (false, true) => self.on_disconnected(),
            _ => return false,
        }
        true
    }

    fn on_connected(&mut self) {
        self.connected = true;
        info!("engine: transport connected");
        if self.session.is_some() {
            self.announce_session();
            self.resubscribe_disconnected();
        }
    }

    fn on_disconnected(&mut self) {
        self.connected = false;
        let mut interrupted = 0;
        for state in [SubscriptionState::Joining, SubscriptionState::Joined] {
            for id in self.conversations.ids_in_state(state) {
                self.conversations
                    .set_state(&id, SubscriptionState::Disconnected);
                interrupted += 1;
            }
        }
        self.typing.clear();
        info!(interrupted, "engine: transport disconnected");
    }

    fn announce_session(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let username = session.username.clone();
        let bootstrap = !std::mem::replace(&mut session.bootstrapped, true);

        let _ = self.emit(ClientEvent::UserJoin(username));
        if bootstrap {
            let api = self.api.clone();
            self.spawn_request(async move { Completion::RosterFetched(api.list_users().await) });
            let api = self.api.clone();
            self.spawn_request(async move { Completion::FeedFetched(api.list_messages().await) });
        }
    }

    fn resubscribe_disconnected(&mut self) {
        let mut ids = self
            .conversations
            .ids_in_state(SubscriptionState::Disconnected);
        if let Some(active) = self.active_id().cloned() {
            if let Some(pos) = ids.iter().position(|id| id == &active) {
                let active = ids.remove(pos);
                ids.insert(0, active);
            }
        }
        for id in ids {
            info!(conversation = %id, "engine: resubscribing after reconnect");
            self.subscribe(&id);
        }
    }

    fn resync_active(&mut self) {
        let Some(active) = self.active_id().cloned() else {
            return;
        };
        let Some(remote) = self
            .conversations
            .get(&active)
            .and_then(|c| c.remote_id().cloned())
        else {
            return;
        };
        self.pull_history(active, remote);
    }

    // --- subscription state machine ------------------------------------------

    /// `Unjoined | Left | Disconnected -> Joining`, then create (if needed),
    /// join-room and pull history.
    fn subscribe(&mut self, id: &ConversationId) {
        let Some(conversation) = self.conversations.get(id) else {
            return;
        };
        let remote = conversation.remote_id().cloned();
        let (a, b) = conversation.participants();
        let (a, b) = (a.clone(), b.clone());
        self.conversations.set_state(id, SubscriptionState::Joining);

        match remote {
            Some(remote) => self.join_room(id.clone(), remote),
            None => {
                if !self.creating.insert(id.clone()) {
                    debug!(conversation = %id, "engine: chat creation already in flight");
                    return;
                }
                let (self_id, peer) = match self.self_id() {
                    Some(me) if me == b => (b, a),
                    _ => (a, b),
                };
                let conversation = id.clone();
                let api = self.api.clone();
                self.spawn_request(async move {
                    Completion::ChatCreated {
                        conversation,
                        result: api.create_chat(self_id, peer).await,
                    }
                });
            }
        }
    }

    fn join_room(&mut self, id: ConversationId, remote: ConversationId) {
        if self.emit(ClientEvent::ChatJoin(remote.clone())).is_err() {
            self.conversations
                .set_state(&id, SubscriptionState::Disconnected);
            return;
        }
        self.pull_history(id, remote);
    }

    fn pull_history(&mut self, id: ConversationId, remote: ConversationId) {
        let api = self.api.clone();
        self.spawn_request(async move {
            Completion::HistoryLoaded {
                result: api.chat_history(&remote).await,
                conversation: id,
            }
        });
    }

    fn fail_subscription(&mut self, id: &ConversationId, err: EngineError) {
        if self.conversations.get(id).map(|c| c.state()) == Some(SubscriptionState::Joining) {
            self.conversations.set_state(id, SubscriptionState::Unjoined);
        }
        self.report(err);
    }

    fn apply_completion(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let Completion::ChatCreated { conversation, .. } = &completion {
            self.creating.remove(conversation);
        }
        match completion {
            Completion::ChatCreated {
                conversation,
                result: Ok(remote),
            } => {
                self.conversations.bind_remote(&conversation, remote.clone());
                let state = self.conversations.get(&conversation).map(|c| c.state());
                if state == Some(SubscriptionState::Joining) {
                    self.join_room(conversation, remote);
                } else {
                    debug!(conversation = %conversation, ?state, "engine: chat created for superseded subscription");
                }
            }
            Completion::ChatCreated {
                conversation,
                result: Err(err),
            } => self.fail_subscription(&conversation, err),
            Completion::HistoryLoaded {
                conversation,
                result: Ok(messages),
            } => self.on_history(&conversation, messages),
            Completion::HistoryLoaded {
                conversation,
                result: Err(err),
            } => self.fail_subscription(&conversation, err),
            Completion::ReadAcknowledged {
                conversation,
                result,
            } => {
                if let Err(err) = result {
                    warn!(conversation = %conversation, %err, "engine: read receipt failed, keeping local read state");
                }
            }
            Completion::RosterFetched(Ok(members)) => {
                self.presence.apply_full_roster(members);
                self.resolve_self();
            }
            Completion::FeedFetched(Ok(messages)) => {
                for message in messages {
                    self.route_message(message, false);
                }
            }
            Completion::RosterFetched(Err(err)) | Completion::FeedFetched(Err(err)) => {
                self.report(err)
            }
            Completion::MemberRemoved { member, result } => match result {
                Ok(()) => {
                    self.presence.remove(&member);
                }
                Err(err) => self.report(err),
            },
            Completion::MessageRemoved { message, result } => match result {
                Ok(()) => {
                    self.conversations.remove_message(&message);
                }
                Err(err) => self.report(err),
            },
        }
        self.publish();
    }

    fn on_history(&mut self, id: &ConversationId, messages: Vec<Message>) {
        let merged = self.conversations.load_history(id, messages);
        let state = self.conversations.get(id).map(|c| c.state());
        if state == Some(SubscriptionState::Joining) {
            self.conversations.set_state(id, SubscriptionState::Joined);
            info!(conversation = %id, merged, "engine: conversation joined");
        } else {
            debug!(conversation = %id, merged, ?state, "engine: history merged");
        }

        if self.active_id() == Some(id) {
            let _ = self.mark_active_read();
            let _ = self
                .updates
                .send(EngineUpdate::ScrollToLatest(id.clone()));
        }
    }

    // --- incoming events -------------------------------------------------------

    fn dispatch(&mut self, name: &str, data: Value) {
        let event = match ServerEvent::decode(name, data) {
            Ok(event) => event,
            Err(err) if err.is_unknown_event() => {
                debug!(event = name, "engine: ignoring unknown event");
                return;
            }
            Err(err) => {
                let err = EngineError::MalformedEvent {
                    event: name.to_string(),
                    reason: err.to_string(),
                };
                warn!(%err, "engine: dropping malformed event");
                return;
            }
        };

        match event {
            ServerEvent::UserJoined(snapshot) => self.on_joined_snapshot(snapshot),
            ServerEvent::UsersUpdate(RosterUpdate::Full(members)) => {
                self.presence.apply_full_roster(members);
                self.resolve_self();
            }
            ServerEvent::UsersUpdate(RosterUpdate::Single(member)) => {
                self.presence.apply_join(member);
                self.resolve_self();
            }
            ServerEvent::UserTyping(payload) => self.on_typing(payload),
            ServerEvent::UserLeft(payload) => self.on_left(payload),
            ServerEvent::MessageNew(message) => self.on_message(message),
            ServerEvent::UserRemoved(removed) => {
                self.presence.remove(&removed.user_id);
            }
            ServerEvent::MessageDeleted(deleted) => {
                self.conversations.remove_message(&deleted.message_id);
            }
        }
    }

    fn on_joined_snapshot(&mut self, snapshot: JoinedSnapshot) {
        self.presence.apply_full_roster(snapshot.users);
        self.resolve_self();
        for message in snapshot.messages {
            self.route_message(message, false);
        }
    }

    fn on_left(&mut self, payload: LeftPayload) {
        if !payload.users.is_empty() {
            self.presence.apply_full_roster(payload.users);
            self.resolve_self();
        }
        let Some(id) = payload.user_id else {
            return;
        };
        let username = self.presence.get(&id).map(|m| m.username.clone());
        self.presence.apply_leave(&id, Utc::now());
        if let (Some(username), Some(active)) = (username, self.active_id().cloned()) {
            self.typing
                .set_typing(&active, &username, false, Instant::now());
        }
    }

    fn on_typing(&mut self, payload: TypingPayload) {
        let Some(active) = self.active_id().cloned() else {
            debug!(who = %payload.username, "engine: typing without active conversation ignored");
            return;
        };
        if let Some(chat_id) = &payload.chat_id {
            if self.conversations.resolve(chat_id) != Some(&active) {
                debug!(chat = %chat_id, "engine: typing for inactive conversation ignored");
                return;
            }
        }
        if self.session.as_ref().map(|s| s.username.as_str()) == Some(payload.username.as_str()) {
            return;
        }
        self.typing
            .set_typing(&active, &payload.username, payload.is_typing, Instant::now());
    }

    fn on_message(&mut self, message: Message) {
        let Some(conversation) = self.route_message(message, true) else {
            return;
        };
        if self.active_id() == Some(&conversation) {
            let _ = self
                .updates
                .send(EngineUpdate::ScrollToLatest(conversation));
        }
    }

    /// Returns the conversation the message landed in, if any.
    ///
    /// Live pushes (`adopt`) without a chat id belong to the open conversation
    /// when its peer or the local member sent them, and may open a conversation
    /// for an unknown chat. Everything else without a home goes to the feed.
    fn route_message(&mut self, message: Message, adopt: bool) -> Option<ConversationId> {
        let Some(chat_id) = message.chat_id.clone() else {
            if adopt {
                if let Some(active) = self.active_with(&message.sender.id) {
                    self.conversations.append_pushed(&active, message);
                    return Some(active);
                }
            }
            self.conversations.merge_feed([message]);
            return None;
        };

        let local = match self.conversations.resolve(&chat_id).cloned() {
            Some(local) => local,
            None if !adopt => {
                self.conversations.merge_feed([message]);
                return None;
            }
            None => {
                let Some(me) = self.self_id() else {
                    warn!(chat = %chat_id, message = %message.id, "engine: message for unknown chat before session resolved, dropped");
                    return None;
                };
                if message.sender.id == me {
                    warn!(chat = %chat_id, message = %message.id, "engine: own message for unknown chat dropped");
                    return None;
                }
                let local = self.conversations.ensure(&me, &message.sender.id);
                self.conversations.bind_remote(&local, chat_id);
                local
            }
        };
        self.conversations.append_pushed(&local, message);
        Some(local)
    }

    /// The open conversation, when `member` is one of its participants.
    fn active_with(&self, member: &MemberId) -> Option<ConversationId> {
        let active = self.active_id()?;
        let (a, b) = self.conversations.get(active)?.participants();
        (a == member || b == member).then(|| active.clone())
    }

    fn resolve_self(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(member) = self.presence.find_by_username(&session.username) else {
            return;
        };
        if session.member_id.as_ref() != Some(&member.id) {
            info!(member = %member.id, username = %session.username, "engine: session resolved to roster member");
            session.member_id = Some(member.id.clone());
        }
    }

    // --- user actions -----------------------------------------------------------

    fn start_session(&mut self, username: String) {
        let username = username.trim().to_string();
        if username.is_empty() {
            warn!("engine: join with empty username ignored");
            return;
        }
        info!(username = %username, "engine: session started");
        self.session = Some(Session::new(username));
        self.last_error = None;
        self.resolve_self();
        if self.connected {
            self.announce_session();
        }
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!(username = %session.username, "engine: session ended");
        }
        self.presence.clear();
        self.conversations.clear();
        self.creating.clear();
        self.typing.clear();
        self.last_error = None;
    }

    fn select_peer(&mut self, peer: MemberId) -> Result<(), EngineError> {
        if self.session.is_none() {
            return Err(EngineError::NoSession);
        }
        let me = self.self_id().ok_or(EngineError::NoSession)?;
        if self.presence.get(&peer).is_none() {
            return Err(EngineError::UnknownMember(peer));
        }
        if peer == me {
            debug!("engine: selecting self ignored");
            return Ok(());
        }

        let id = self.conversations.ensure(&me, &peer);
        if let Some(session) = self.session.as_mut() {
            session.active = Some(id.clone());
        }

        match self.conversations.get(&id).map(|c| c.state()) {
            Some(state) if state.needs_join() => self.subscribe(&id),
            Some(SubscriptionState::Joined) => {
                let _ = self.mark_active_read();
            }
            _ => {}
        }
        Ok(())
    }

    fn send_message(&mut self, content: String) -> Result<(), EngineError> {
        if content.trim().is_empty() {
            return Ok(());
        }
        let active = self
            .active_id()
            .cloned()
            .ok_or(EngineError::NoActiveConversation)?;
        let chat_id = self
            .conversations
            .get(&active)
            .and_then(|c| c.remote_id().cloned())
            .ok_or(EngineError::NoActiveConversation)?;
        self.emit(ClientEvent::MessageSend { chat_id, content })
    }

    fn announce_typing(&mut self, is_typing: bool) -> Result<(), EngineError> {
        if self.active_id().is_none() {
            return Ok(());
        }
        self.emit(ClientEvent::UserTyping(is_typing))
    }

    fn mark_active_read(&mut self) -> Result<(), EngineError> {
        let me = self.self_id().ok_or(EngineError::NoSession)?;
        let active = self
            .active_id()
            .cloned()
            .ok_or(EngineError::NoActiveConversation)?;

        match self
            .conversations
            .get(&active)
            .and_then(|c| c.remote_id().cloned())
        {
            Some(remote) => {
                let api = self.api.clone();
                let reader = me.clone();
                let conversation = active.clone();
                self.spawn_request(async move {
                    Completion::ReadAcknowledged {
                        conversation,
                        result: api.mark_read(&remote, reader).await,
                    }
                });
            }
            None => debug!(conversation = %active, "engine: no remote id yet, read receipt skipped"),
        }

        self.conversations.mark_read(&active, &me);
        Ok(())
    }

    fn close_active(&mut self) {
        let Some(active) = self.session.as_mut().and_then(|s| s.active.take()) else {
            return;
        };
        if matches!(
            self.conversations.get(&active).map(|c| c.state()),
            Some(SubscriptionState::Joining | SubscriptionState::Joined)
        ) {
            self.conversations.set_state(&active, SubscriptionState::Left);
        }
        info!(conversation = %active, "engine: conversation closed");
    }

    fn remove_member(&mut self, id: MemberId) -> Result<(), EngineError> {
        let api = self.api.clone();
        self.spawn_request(async move {
            Completion::MemberRemoved {
                result: api.delete_user(&id).await,
                member: id,
            }
        });
        Ok(())
    }

    fn remove_message(&mut self, id: MessageId) -> Result<(), EngineError> {
        let api = self.api.clone();
        self.spawn_request(async move {
            Completion::MessageRemoved {
                result: api.delete_message(&id).await,
                message: id,
            }
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
