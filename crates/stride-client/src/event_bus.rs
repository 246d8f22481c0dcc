use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use uuid::Uuid;

use stride_types::models::{LeaderboardEntry, Message, Post};

/// State changes published by the client after they have been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected { user_id: Uuid },
    /// The transport closed. `error` is for display only.
    Disconnected { error: Option<String> },
    PresenceChanged { user_id: Uuid, online: bool },
    TypingChanged { conversation_id: Uuid },
    MessagePending { conversation_id: Uuid, client_id: Uuid },
    MessageReceived { message: Message },
    MessageConfirmed { client_id: Uuid, message: Message },
    MessageFailed { conversation_id: Uuid, client_id: Uuid, reason: String },
    ConversationsChanged,
    MessagesRead { conversation_id: Uuid, reader_id: Uuid },
    PostCreated { post: Post },
    PostUpdated { post: Post },
    LeaderboardUpdated { entries: Vec<LeaderboardEntry> },
    ServerError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    PresenceChanged,
    TypingChanged,
    MessagePending,
    MessageReceived,
    MessageConfirmed,
    MessageFailed,
    ConversationsChanged,
    MessagesRead,
    PostCreated,
    PostUpdated,
    LeaderboardUpdated,
    ServerError,
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::PresenceChanged { .. } => EventKind::PresenceChanged,
            Self::TypingChanged { .. } => EventKind::TypingChanged,
            Self::MessagePending { .. } => EventKind::MessagePending,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::MessageConfirmed { .. } => EventKind::MessageConfirmed,
            Self::MessageFailed { .. } => EventKind::MessageFailed,
            Self::ConversationsChanged => EventKind::ConversationsChanged,
            Self::MessagesRead { .. } => EventKind::MessagesRead,
            Self::PostCreated { .. } => EventKind::PostCreated,
            Self::PostUpdated { .. } => EventKind::PostUpdated,
            Self::LeaderboardUpdated { .. } => EventKind::LeaderboardUpdated,
            Self::ServerError { .. } => EventKind::ServerError,
        }
    }

    /// Conversation the event concerns, if any.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::TypingChanged { conversation_id }
            | Self::MessagePending { conversation_id, .. }
            | Self::MessageFailed { conversation_id, .. }
            | Self::MessagesRead { conversation_id, .. } => Some(*conversation_id),
            Self::MessageReceived { message } | Self::MessageConfirmed { message, .. } => {
                Some(message.conversation_id)
            }
            _ => None,
        }
    }
}

type Predicate = Box<dyn Fn(&ClientEvent) -> bool + Send + Sync>;

/// Selects which events a subscription receives.
pub struct EventFilter(Predicate);

impl EventFilter {
    pub fn all() -> Self {
        Self(Box::new(|_| true))
    }

    pub fn kinds(kinds: &[EventKind]) -> Self {
        let kinds = kinds.to_vec();
        Self(Box::new(move |event| kinds.contains(&event.kind())))
    }

    pub fn conversation(conversation_id: Uuid) -> Self {
        Self(Box::new(move |event| event.conversation_id() == Some(conversation_id)))
    }

    pub fn custom(f: impl Fn(&ClientEvent) -> bool + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    fn matches(&self, event: &ClientEvent) -> bool {
        (self.0)(event)
    }
}

struct Subscriber {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out of [`ClientEvent`]s to filtered subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers().insert(id, Subscriber { filter, tx });
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn publish(&self, event: ClientEvent) {
        let mut subscribers = self.inner.subscribers();
        subscribers.retain(|_, sub| {
            if !sub.filter.matches(&event) {
                return true;
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

/// Receiving end of a bus subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ClientEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits for the first event matching `pred`, discarding the others.
    pub async fn wait_for(&mut self, pred: impl Fn(&ClientEvent) -> bool) -> Option<ClientEvent> {
        while let Some(event) = self.rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_route_events_to_matching_subscribers() {
        let bus = EventBus::new();
        let conversation_id = Uuid::new_v4();
        let mut all = bus.subscribe(EventFilter::all());
        let mut typing = bus.subscribe(EventFilter::kinds(&[EventKind::TypingChanged]));
        let mut scoped = bus.subscribe(EventFilter::conversation(conversation_id));

        bus.publish(ClientEvent::ConversationsChanged);
        bus.publish(ClientEvent::TypingChanged { conversation_id });
        bus.publish(ClientEvent::TypingChanged {
            conversation_id: Uuid::new_v4(),
        });

        assert_eq!(all.try_recv(), Some(ClientEvent::ConversationsChanged));
        assert!(all.try_recv().is_some());
        assert!(all.try_recv().is_some());

        assert_eq!(typing.try_recv(), Some(ClientEvent::TypingChanged { conversation_id }));
        assert!(typing.try_recv().is_some());
        assert!(typing.try_recv().is_none());

        assert_eq!(scoped.try_recv(), Some(ClientEvent::TypingChanged { conversation_id }));
        assert!(scoped.try_recv().is_none());
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let bus = EventBus::new();
        let first = bus.subscribe(EventFilter::all());
        let _second = bus.subscribe(EventFilter::all());
        assert_eq!(bus.subscriber_count(), 2);

        drop(first);
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(ClientEvent::ConversationsChanged);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn wait_for_skips_unrelated_events() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        bus.publish(ClientEvent::ConversationsChanged);
        bus.publish(ClientEvent::ServerError {
            message: "nope".into(),
        });

        let event = sub
            .wait_for(|e| e.kind() == EventKind::ServerError)
            .await
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::ServerError {
                message: "nope".into()
            }
        );
    }
}
