use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{error, warn};
use uuid::Uuid;

use stride_types::events::ServerEvent;

/// An event serialized once and fanned out to every connection.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// Conversation the event is scoped to; `None` means global.
    pub scope: Option<Uuid>,
    /// User whose connections skip this event. Set for `receive_message`,
    /// whose author gets `message_sent` instead.
    pub exclude: Option<Uuid>,
    /// Users allowed to see this event regardless of the rooms they joined.
    /// `None` means no restriction.
    pub audience: Option<Arc<HashSet<Uuid>>>,
    pub json: Arc<str>,
}

impl BroadcastMessage {
    /// Whether a connection of `user_id` with `rooms` joined should get this.
    pub fn is_for(&self, user_id: Uuid, rooms: &HashSet<Uuid>) -> bool {
        if self.exclude == Some(user_id) {
            return false;
        }
        if let Some(audience) = &self.audience {
            return audience.contains(&user_id);
        }
        match self.scope {
            Some(room) => rooms.contains(&room),
            None => true,
        }
    }
}

/// Manages all connected clients and broadcasts events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events. Every connection receives every
    /// message and filters by scope.
    broadcast_tx: broadcast::Sender<BroadcastMessage>,

    /// Track online users: user_id -> username
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<ServerEvent>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients (subject to scope).
    /// Member-only events must go through [`Dispatcher::broadcast_to_members`].
    pub fn broadcast(&self, event: ServerEvent) {
        if let Some(conversation_id) = event.members_only() {
            warn!(
                "Dropping {} for {}: member-only event sent without members",
                event.name(),
                conversation_id
            );
            return;
        }
        self.publish(event, None);
    }

    /// Deliver an event to every member of its conversation, whether or not
    /// they have the room open.
    pub fn broadcast_to_members(&self, event: ServerEvent, members: Vec<Uuid>) {
        self.publish(event, Some(Arc::new(members.into_iter().collect())));
    }

    fn publish(&self, event: ServerEvent, audience: Option<Arc<HashSet<Uuid>>>) {
        let exclude = match &event {
            ServerEvent::ReceiveMessage { message } => Some(message.sender_id),
            _ => None,
        };
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.name(), e);
                return;
            }
        };
        // No receivers is fine: nobody is connected.
        let _ = self.inner.broadcast_tx.send(BroadcastMessage {
            scope: event.scope(),
            exclude,
            audience,
            json: json.into(),
        });
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    /// A newer connection of the same user takes over the channel.
    pub async fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.user_channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            if tx.send(event).is_err() {
                warn!("Targeted channel for {} is closed", user_id);
            }
        }
    }

    /// Register a user as online and announce it.
    pub async fn user_online(&self, user_id: Uuid, username: String) {
        self.inner
            .online_users
            .write()
            .await
            .insert(user_id, username.clone());

        self.broadcast(ServerEvent::UserOnline { user_id, username });
    }

    /// Register a user as offline. Only cleans up if conn_id matches.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        // Only clean up if this connection still owns the user channel
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            // A newer connection has taken over
            return;
        }

        self.inner.online_users.write().await.remove(&user_id);
        self.unregister_user_channel(user_id, conn_id).await;
        self.broadcast(ServerEvent::UserOffline { user_id });
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.online_users.read().await.contains_key(&user_id)
    }
}
