use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stride_types::events::{ClientCommand, ServerEvent};
use stride_types::models::{Conversation, Message, UserProfile};

use crate::config::{ClientConfig, PreferenceStore};
use crate::connection::{ConnectionManager, ConnectionState, Inbound};
use crate::error::ClientError;
use crate::event_bus::{ClientEvent, EventBus, EventFilter, Subscription};
use crate::presence::{PresenceTracker, TypingEntry};
use crate::relay::{Draft, MessageRelay, ThreadEntry};
use crate::rooms::RoomCoordinator;
use crate::session::Session;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECTION_LOST: &str = "connection lost before the server confirmed";
const NOT_CONNECTED: &str = "not connected";

/// Session-scoped client core. Cheap to clone; all clones share one
/// connection and one state.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    user_id: Uuid,
    connection: ConnectionManager,
    bus: EventBus,
    session: Mutex<Option<Session>>,
    /// Held only for in-memory updates, never across an await.
    state: Mutex<ClientState>,
    tasks: Mutex<Option<CancellationToken>>,
}

struct ClientState {
    presence: PresenceTracker,
    rooms: RoomCoordinator,
    relay: MessageRelay,
}

/// Events to publish and commands to emit once the state lock is released.
#[derive(Default)]
struct Effects {
    events: Vec<ClientEvent>,
    commands: Vec<ClientCommand>,
}

impl ClientInner {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        lock(&self.state)
    }

    fn stop_tasks(&self) {
        if let Some(cancel) = lock(&self.tasks).take() {
            cancel.cancel();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

impl ChatClient {
    pub fn new(config: ClientConfig, session: Session) -> Self {
        let user_id = session.user_id();
        let state = ClientState {
            presence: PresenceTracker::new(config.typing_ttl),
            rooms: RoomCoordinator::new(),
            relay: MessageRelay::new(user_id),
        };
        Self {
            inner: Arc::new(ClientInner {
                connection: ConnectionManager::new(config.gateway_url.clone()),
                config,
                user_id,
                bus: EventBus::new(),
                session: Mutex::new(Some(session)),
                state: Mutex::new(state),
                tasks: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Opens the preference file named in the client configuration.
    pub fn preferences(&self) -> Result<PreferenceStore, ClientError> {
        PreferenceStore::from_config(&self.inner.config)
    }

    pub fn user_id(&self) -> Uuid {
        self.inner.user_id
    }

    pub fn session(&self) -> Option<Session> {
        lock(&self.inner.session).clone()
    }

    /// Replaces the profile snapshot of the current session.
    pub fn refresh_profile(&self, profile: UserProfile) -> bool {
        lock(&self.inner.session)
            .as_mut()
            .is_some_and(|session| session.refresh(profile))
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.bus.subscribe(filter)
    }

    // -- Connection --

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.connection.last_error()
    }

    /// Connects with the session credential and waits for the gateway
    /// handshake. Without a session this is a silent no-op. A live connection
    /// is released first, as by [`ChatClient::disconnect`].
    pub async fn connect(&self) -> Result<(), ClientError> {
        let token = self.session().map(|s| s.token().to_string());

        if matches!(
            self.connection_state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            self.disconnect();
        }
        self.inner.stop_tasks();
        let Some(inbound) = self.inner.connection.connect(token.as_deref()).await? else {
            debug!("connect() without a credential, skipping");
            return Ok(());
        };

        let cancel = CancellationToken::new();
        *lock(&self.inner.tasks) = Some(cancel.clone());
        spawn_driver(Arc::downgrade(&self.inner), inbound, cancel.clone());
        spawn_typing_sweep(Arc::downgrade(&self.inner), self.inner.config.typing_ttl, cancel);

        let mut state_rx = self.inner.connection.watch_state();
        let settled = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            state_rx
                .wait_for(|s| *s != ConnectionState::Connecting)
                .await
                .map(|s| *s)
        })
        .await;

        match settled {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(_) => Err(ClientError::Transport(
                self.last_error()
                    .unwrap_or_else(|| "connection closed during handshake".into()),
            )),
            Err(_) => {
                self.disconnect();
                Err(ClientError::HandshakeTimeout)
            }
        }
    }

    /// Releases the connection and clears presence and typing state. Always
    /// safe to call.
    pub fn disconnect(&self) {
        let was_live = matches!(
            self.connection_state(),
            ConnectionState::Connecting | ConnectionState::Connected
        );
        self.inner.stop_tasks();
        self.inner.connection.disconnect();

        let mut fx = self.reset_connection_state();
        if was_live {
            info!("Disconnected from gateway");
            fx.events.push(ClientEvent::Disconnected { error: None });
        }
        self.apply(fx);
    }

    /// Ends the session: the connection is closed for good and the
    /// credential dropped.
    pub fn logout(&self) {
        self.disconnect();
        self.inner.connection.close();
        lock(&self.inner.session).take();
        info!("Logged out");
    }

    fn transport_closed(&self, error: Option<String>) {
        if let Some(e) = &error {
            warn!("Gateway connection lost: {}", e);
        }
        self.inner.stop_tasks();
        let mut fx = self.reset_connection_state();
        fx.events.push(ClientEvent::Disconnected { error });
        self.apply(fx);
    }

    /// Clears derived state and fails sends that can no longer be confirmed.
    fn reset_connection_state(&self) -> Effects {
        let mut fx = Effects::default();
        let mut st = self.inner.state();

        for conversation_id in st.presence.typing_conversations() {
            fx.events.push(ClientEvent::TypingChanged { conversation_id });
        }
        st.presence.clear();

        for (conversation_id, client_id) in st.relay.fail_pending(CONNECTION_LOST) {
            fx.events.push(ClientEvent::MessageFailed {
                conversation_id,
                client_id,
                reason: CONNECTION_LOST.into(),
            });
        }
        fx
    }

    // -- Rooms --

    /// Makes `conversation_id` the active conversation: leaves the previous
    /// room, drops its typing indicators, joins the new room and marks it
    /// read.
    pub fn open_conversation(&self, conversation_id: Option<Uuid>) {
        let mut fx = Effects::default();
        {
            let mut st = self.inner.state();
            let selection = st.rooms.select(conversation_id);
            fx.commands.extend(selection.commands);

            if let Some(previous) = selection.previous {
                if st.presence.drop_conversation(previous) {
                    fx.events.push(ClientEvent::TypingChanged {
                        conversation_id: previous,
                    });
                }
            }

            st.relay.set_active(conversation_id);
            if let Some(id) = conversation_id {
                if st.relay.unread_count(id) > 0 {
                    fx.commands.push(st.relay.mark_as_read(id));
                    fx.events.push(ClientEvent::ConversationsChanged);
                }
            }
        }
        self.apply(fx);
    }

    pub fn active_conversation(&self) -> Option<Uuid> {
        self.inner.state().rooms.active()
    }

    pub fn join_room(&self, conversation_id: Uuid) -> bool {
        let command = self.inner.state().rooms.join_room(conversation_id);
        command.is_some_and(|c| self.emit(c))
    }

    pub fn leave_room(&self, conversation_id: Uuid) -> bool {
        let command = self.inner.state().rooms.leave_room(conversation_id);
        self.drop_typing(conversation_id);
        command.is_some_and(|c| self.emit(c))
    }

    pub fn join_group(&self, group_id: Uuid) -> bool {
        let command = self.inner.state().rooms.join_group(group_id);
        command.is_some_and(|c| self.emit(c))
    }

    pub fn leave_group(&self, group_id: Uuid) -> bool {
        let command = self.inner.state().rooms.leave_group(group_id);
        self.drop_typing(group_id);
        command.is_some_and(|c| self.emit(c))
    }

    pub fn joined_rooms(&self) -> Vec<Uuid> {
        self.inner.state().rooms.joined()
    }

    fn drop_typing(&self, conversation_id: Uuid) {
        let dropped = {
            let mut st = self.inner.state();
            !st.rooms.is_joined(conversation_id) && st.presence.drop_conversation(conversation_id)
        };
        if dropped {
            self.inner
                .bus
                .publish(ClientEvent::TypingChanged { conversation_id });
        }
    }

    // -- Messages --

    /// Sends a draft optimistically. Returns the client id of the pending
    /// copy, or `None` for a blank draft.
    pub fn send_message(&self, draft: Draft) -> Option<Uuid> {
        let conversation_id = draft.conversation_id;
        let (client_id, command) = self.inner.state().relay.send(draft, Utc::now())?;

        self.inner.bus.publish(ClientEvent::MessagePending {
            conversation_id,
            client_id,
        });
        self.inner.bus.publish(ClientEvent::ConversationsChanged);

        if !self.emit(command) {
            self.refuse(client_id);
        }
        Some(client_id)
    }

    /// Re-sends a failed message. Returns whether it went out.
    pub fn retry(&self, client_id: Uuid) -> bool {
        let Some(command) = self.inner.state().relay.retry(client_id) else {
            return false;
        };
        if self.emit(command) {
            return true;
        }
        self.refuse(client_id);
        false
    }

    pub fn discard(&self, client_id: Uuid) -> bool {
        let discarded = self.inner.state().relay.discard(client_id).is_some();
        if discarded {
            self.inner.bus.publish(ClientEvent::ConversationsChanged);
        }
        discarded
    }

    fn refuse(&self, client_id: Uuid) {
        let failed = self.inner.state().relay.fail(client_id, NOT_CONNECTED);
        if let Some(conversation_id) = failed {
            self.inner.bus.publish(ClientEvent::MessageFailed {
                conversation_id,
                client_id,
                reason: NOT_CONNECTED.into(),
            });
        }
    }

    /// Zeroes the unread count locally and tells the server. Returns whether
    /// the server was told.
    pub fn mark_as_read(&self, conversation_id: Uuid) -> bool {
        let command = self.inner.state().relay.mark_as_read(conversation_id);
        self.inner.bus.publish(ClientEvent::ConversationsChanged);
        self.emit(command)
    }

    pub fn start_typing(&self, conversation_id: Uuid) -> bool {
        self.emit(ClientCommand::Typing { conversation_id })
    }

    pub fn stop_typing(&self, conversation_id: Uuid) -> bool {
        self.emit(ClientCommand::StopTyping { conversation_id })
    }

    pub fn toggle_pin(&self, conversation_id: Uuid) -> Option<bool> {
        let pinned = self.inner.state().relay.toggle_pin(conversation_id);
        if pinned.is_some() {
            self.inner.bus.publish(ClientEvent::ConversationsChanged);
        }
        pinned
    }

    pub fn toggle_mute(&self, conversation_id: Uuid) -> Option<bool> {
        let muted = self.inner.state().relay.toggle_mute(conversation_id);
        if muted.is_some() {
            self.inner.bus.publish(ClientEvent::ConversationsChanged);
        }
        muted
    }

    // -- Cache --

    /// Seeds the conversation list, e.g. from `GET /conversations`.
    pub fn load_conversations(&self, conversations: Vec<Conversation>) {
        self.inner.state().relay.load_conversations(conversations);
        self.inner.bus.publish(ClientEvent::ConversationsChanged);
    }

    pub fn upsert_conversation(&self, conversation: Conversation) {
        self.inner.state().relay.upsert_conversation(conversation);
        self.inner.bus.publish(ClientEvent::ConversationsChanged);
    }

    /// Seeds a thread, e.g. from `GET /conversations/{id}/messages`.
    pub fn load_history(&self, conversation_id: Uuid, messages: Vec<Message>) {
        self.inner.state().relay.load_history(conversation_id, messages);
        self.inner.bus.publish(ClientEvent::ConversationsChanged);
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.state().relay.conversations().to_vec()
    }

    pub fn conversation(&self, conversation_id: Uuid) -> Option<Conversation> {
        self.inner.state().relay.conversation(conversation_id).cloned()
    }

    pub fn thread(&self, conversation_id: Uuid) -> Vec<ThreadEntry> {
        self.inner.state().relay.thread(conversation_id).to_vec()
    }

    pub fn message_entry(&self, client_id: Uuid) -> Option<ThreadEntry> {
        self.inner.state().relay.entry(client_id).cloned()
    }

    pub fn unread_count(&self, conversation_id: Uuid) -> u32 {
        self.inner.state().relay.unread_count(conversation_id)
    }

    // -- Presence --

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.state().presence.is_online(user_id)
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        self.inner.state().presence.online_users()
    }

    pub fn typing_in(&self, conversation_id: Uuid) -> Vec<TypingEntry> {
        self.inner.state().presence.typing_in(conversation_id)
    }

    /// Drops typing indicators older than the configured TTL.
    pub fn sweep_typing(&self) {
        self.sweep_typing_at(Instant::now());
    }

    fn sweep_typing_at(&self, now: Instant) {
        let expired = self.inner.state().presence.expire(now);
        for conversation_id in expired {
            self.inner
                .bus
                .publish(ClientEvent::TypingChanged { conversation_id });
        }
    }

    // -- Inbound --

    /// Applies one gateway event. Called by the driver task in arrival order.
    pub fn handle_event(&self, event: ServerEvent) {
        let me = self.inner.user_id;
        let mut fx = Effects::default();
        {
            let mut st = self.inner.state();
            match event {
                ServerEvent::Connect { user_id, username } => {
                    info!("Gateway ready for {} ({})", username, user_id);
                    fx.commands.extend(st.rooms.rejoin());
                    fx.events.push(ClientEvent::Connected { user_id });
                }

                ServerEvent::UserOnline { user_id, .. } => {
                    if st.presence.user_online(user_id) {
                        fx.events.push(ClientEvent::PresenceChanged { user_id, online: true });
                    }
                }

                ServerEvent::UserOffline { user_id } => {
                    for conversation_id in st.presence.typing_of(user_id) {
                        fx.events.push(ClientEvent::TypingChanged { conversation_id });
                    }
                    if st.presence.user_offline(user_id) {
                        fx.events.push(ClientEvent::PresenceChanged { user_id, online: false });
                    }
                }

                ServerEvent::Typing {
                    conversation_id,
                    user_id,
                    username,
                } => {
                    // Late events for rooms already left are ignored
                    if user_id != me
                        && st.rooms.is_joined(conversation_id)
                        && st
                            .presence
                            .typing_started(conversation_id, user_id, username, Instant::now())
                    {
                        fx.events.push(ClientEvent::TypingChanged { conversation_id });
                    }
                }

                ServerEvent::StopTyping {
                    conversation_id,
                    user_id,
                } => {
                    if st.presence.typing_stopped(conversation_id, user_id) {
                        fx.events.push(ClientEvent::TypingChanged { conversation_id });
                    }
                }

                ServerEvent::ReceiveMessage { message } => {
                    let sender = message.sender_id;
                    if let Some(received) = st.relay.receive(message.clone()) {
                        if received.unknown_conversation {
                            debug!("Message for uncached conversation {}", received.conversation_id);
                        }
                        if st.presence.typing_stopped(received.conversation_id, sender) {
                            fx.events.push(ClientEvent::TypingChanged {
                                conversation_id: received.conversation_id,
                            });
                        }
                        fx.commands.extend(received.mark_read);
                        fx.events.push(ClientEvent::MessageReceived { message });
                        fx.events.push(ClientEvent::ConversationsChanged);
                    }
                }

                ServerEvent::MessageSent { client_id, message } => {
                    if st.relay.confirm(client_id, message.clone()) {
                        fx.events.push(ClientEvent::MessageConfirmed { client_id, message });
                        fx.events.push(ClientEvent::ConversationsChanged);
                    }
                }

                ServerEvent::MessageFailed { client_id, reason } => {
                    warn!("Message {} rejected: {}", client_id, reason);
                    if let Some(conversation_id) = st.relay.fail(client_id, reason.clone()) {
                        fx.events.push(ClientEvent::MessageFailed {
                            conversation_id,
                            client_id,
                            reason,
                        });
                    }
                }

                ServerEvent::MessagesRead {
                    conversation_id,
                    reader_id,
                    read_at,
                } => {
                    if st.relay.messages_read(conversation_id, reader_id, read_at) {
                        fx.events.push(ClientEvent::ConversationsChanged);
                    }
                    fx.events.push(ClientEvent::MessagesRead {
                        conversation_id,
                        reader_id,
                    });
                }

                ServerEvent::PostCreated { post } => fx.events.push(ClientEvent::PostCreated { post }),
                ServerEvent::PostUpdated { post } => fx.events.push(ClientEvent::PostUpdated { post }),
                ServerEvent::LeaderboardUpdated { entries } => {
                    fx.events.push(ClientEvent::LeaderboardUpdated { entries })
                }

                ServerEvent::Error {
                    message,
                    conversation_id,
                } => {
                    warn!("Gateway error: {}", message);
                    if let Some(id) = conversation_id {
                        if st.rooms.forget(id) && st.presence.drop_conversation(id) {
                            fx.events.push(ClientEvent::TypingChanged { conversation_id: id });
                        }
                    }
                    fx.events.push(ClientEvent::ServerError { message });
                }
            }
        }
        self.apply(fx);
    }

    fn emit(&self, command: ClientCommand) -> bool {
        self.inner.connection.emit(command)
    }

    fn apply(&self, fx: Effects) {
        for command in fx.commands {
            self.emit(command);
        }
        for event in fx.events {
            self.inner.bus.publish(event);
        }
    }
}

fn spawn_driver(inner: Weak<ClientInner>, mut inbound: mpsc::UnboundedReceiver<Inbound>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = inbound.recv() => next,
            };
            let Some(next) = next else { break };
            let Some(inner) = inner.upgrade() else { break };
            let client = ChatClient { inner };
            match next {
                Inbound::Event(event) => client.handle_event(event),
                Inbound::Closed { error } => {
                    client.transport_closed(error);
                    break;
                }
            }
        }
    });
}

/// Expires typing indicators whose stop event never arrived.
fn spawn_typing_sweep(inner: Weak<ClientInner>, ttl: Duration, cancel: CancellationToken) {
    let period = (ttl / 4).max(Duration::from_millis(100));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    ChatClient { inner }.sweep_typing();
                }
            }
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventKind;
    use crate::relay::Delivery;
    use stride_types::models::{ConversationKind, DeliveryStatus, FitnessLevel};

    fn client() -> ChatClient {
        let profile = UserProfile {
            id: Uuid::new_v4(),
            username: "rio".into(),
            display_name: "Rio".into(),
            bio: String::new(),
            fitness_level: FitnessLevel::Intermediate,
            interests: vec!["running".into()],
            onboarded: true,
            created_at: Utc::now(),
        };
        let config = ClientConfig::new("ws://127.0.0.1:9/gateway").with_typing_ttl(Duration::from_secs(8));
        ChatClient::new(config, Session::new("token", profile))
    }

    fn conversation(id: Uuid, participants: Vec<Uuid>) -> Conversation {
        Conversation {
            id,
            kind: ConversationKind::Direct,
            name: "Ana".into(),
            participants,
            last_message: None,
            unread_count: 0,
            pinned: false,
            muted: false,
            updated_at: Utc::now(),
        }
    }

    fn typing(conversation_id: Uuid, user_id: Uuid) -> ServerEvent {
        ServerEvent::Typing {
            conversation_id,
            user_id,
            username: "ana".into(),
        }
    }

    #[test]
    fn switching_conversations_drops_old_typing_entries() {
        let client = client();
        let (a, b, ana) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        client.open_conversation(Some(a));
        client.handle_event(typing(a, ana));
        assert_eq!(client.typing_in(a).len(), 1);

        client.open_conversation(Some(b));
        assert!(client.typing_in(a).is_empty());
        assert_eq!(client.active_conversation(), Some(b));
        assert_eq!(client.joined_rooms(), vec![b]);

        // A late typing event for the room already left changes nothing
        client.handle_event(typing(a, ana));
        assert!(client.typing_in(a).is_empty());
    }

    #[test]
    fn blank_send_emits_and_changes_nothing() {
        let client = client();
        let conv = Uuid::new_v4();
        client.load_conversations(vec![conversation(conv, vec![client.user_id()])]);
        let mut events = client.subscribe(EventFilter::all());
        let before = client.conversations();

        assert_eq!(client.send_message(Draft::text(conv, "  ")), None);

        assert!(events.try_recv().is_none());
        assert!(client.thread(conv).is_empty());
        assert_eq!(client.conversations(), before);
    }

    #[test]
    fn sends_while_disconnected_fail_immediately() {
        let client = client();
        let conv = Uuid::new_v4();
        let mut failures = client.subscribe(EventFilter::kinds(&[EventKind::MessageFailed]));

        let client_id = client.send_message(Draft::text(conv, "anyone?")).unwrap();

        assert!(matches!(
            client.message_entry(client_id).unwrap().delivery,
            Delivery::Failed { .. }
        ));
        assert!(matches!(
            failures.try_recv(),
            Some(ClientEvent::MessageFailed { client_id: id, .. }) if id == client_id
        ));
        assert!(!client.retry(client_id));
        assert!(client.discard(client_id));
        assert!(client.thread(conv).is_empty());
    }

    #[test]
    fn server_confirmation_reconciles_pending_copy() {
        let client = client();
        let conv = Uuid::new_v4();
        let client_id = client.send_message(Draft::text(conv, "tempo run")).unwrap();

        let stored = Message {
            id: Uuid::new_v4(),
            conversation_id: conv,
            sender_id: client.user_id(),
            text: Some("tempo run".into()),
            media: None,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
        };
        client.handle_event(ServerEvent::MessageSent {
            client_id,
            message: stored.clone(),
        });

        let entry = client.message_entry(client_id).unwrap();
        assert_eq!(entry.delivery, Delivery::Confirmed);
        assert_eq!(entry.message, stored);
    }

    #[test]
    fn presence_follows_events_and_clears_on_disconnect() {
        let client = client();
        let (ana, conv) = (Uuid::new_v4(), Uuid::new_v4());
        client.join_room(conv);

        client.handle_event(ServerEvent::UserOnline {
            user_id: ana,
            username: "ana".into(),
        });
        client.handle_event(typing(conv, ana));
        assert!(client.is_online(ana));

        client.handle_event(ServerEvent::UserOffline { user_id: ana });
        assert!(!client.is_online(ana));
        assert!(client.typing_in(conv).is_empty());

        client.handle_event(ServerEvent::UserOnline {
            user_id: ana,
            username: "ana".into(),
        });
        client.handle_event(typing(conv, ana));
        client.disconnect();
        assert!(client.online_users().is_empty());
        assert!(client.typing_in(conv).is_empty());
    }

    #[test]
    fn stale_typing_entries_are_swept() {
        let client = client();
        let (ana, conv) = (Uuid::new_v4(), Uuid::new_v4());
        client.join_room(conv);
        client.handle_event(typing(conv, ana));

        client.sweep_typing_at(Instant::now() + Duration::from_secs(7));
        assert_eq!(client.typing_in(conv).len(), 1);

        client.sweep_typing_at(Instant::now() + Duration::from_secs(9));
        assert!(client.typing_in(conv).is_empty());
    }

    #[test]
    fn opening_a_conversation_marks_it_read() {
        let client = client();
        let (conv, ana) = (Uuid::new_v4(), Uuid::new_v4());
        client.load_conversations(vec![conversation(conv, vec![client.user_id(), ana])]);

        client.handle_event(ServerEvent::ReceiveMessage {
            message: Message {
                id: Uuid::new_v4(),
                conversation_id: conv,
                sender_id: ana,
                text: Some("morning!".into()),
                media: None,
                created_at: Utc::now(),
                status: DeliveryStatus::Sent,
            },
        });
        assert_eq!(client.unread_count(conv), 1);

        client.open_conversation(Some(conv));
        assert_eq!(client.unread_count(conv), 0);
    }

    /// Accepts gateway connections and acknowledges each with `connect`.
    async fn fake_gateway(user_id: Uuid) -> String {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    let hello = ServerEvent::Connect {
                        user_id,
                        username: "rio".into(),
                    };
                    let text = serde_json::to_string(&hello).unwrap();
                    ws.send(WsMessage::Text(text.into())).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        format!("ws://{}/gateway", addr)
    }

    #[tokio::test]
    async fn reconnecting_resets_connection_state() {
        let session = client().session().unwrap();
        let url = fake_gateway(session.user_id()).await;
        let client = ChatClient::new(ClientConfig::new(url), session);
        client.connect().await.unwrap();

        let (ana, conv) = (Uuid::new_v4(), Uuid::new_v4());
        client.handle_event(ServerEvent::UserOnline {
            user_id: ana,
            username: "ana".into(),
        });
        let client_id = client.send_message(Draft::text(conv, "warming up")).unwrap();
        assert_eq!(client.message_entry(client_id).unwrap().delivery, Delivery::Pending);

        let mut dropped = client.subscribe(EventFilter::kinds(&[EventKind::Disconnected]));
        client.connect().await.unwrap();

        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert!(client.online_users().is_empty());
        assert!(matches!(
            client.message_entry(client_id).unwrap().delivery,
            Delivery::Failed { .. }
        ));
        assert_eq!(dropped.try_recv(), Some(ClientEvent::Disconnected { error: None }));
    }

    #[test]
    fn refused_join_is_forgotten() {
        let client = client();
        let (conv, ana) = (Uuid::new_v4(), Uuid::new_v4());
        client.open_conversation(Some(conv));
        client.handle_event(typing(conv, ana));

        client.handle_event(ServerEvent::Error {
            message: "not a member of this conversation".into(),
            conversation_id: Some(conv),
        });

        assert!(client.joined_rooms().is_empty());
        assert!(client.typing_in(conv).is_empty());
        assert_eq!(client.active_conversation(), Some(conv));
    }

    #[test]
    fn preferences_come_from_the_configured_file() {
        let dir = std::env::temp_dir().join(format!("stride-client-{}", Uuid::new_v4()));
        let session = client().session().unwrap();
        let config = ClientConfig::new("ws://127.0.0.1:9/gateway").with_preferences_path(dir.join("prefs.json"));
        let client = ChatClient::new(config, session);

        client.preferences().unwrap().mark_onboarding_seen().unwrap();
        assert!(client.preferences().unwrap().get().seen_onboarding);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn logout_is_terminal() {
        let client = client();
        client.logout();
        assert!(client.session().is_none());
        assert_eq!(client.connection_state(), ConnectionState::Closed);
        // No credential left: connecting is a silent no-op
        assert!(client.connect().await.is_ok());
        assert_eq!(client.connection_state(), ConnectionState::Closed);
    }
}
