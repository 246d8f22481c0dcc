use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{LeaderboardEntry, MediaDescriptor, Message, Post};

/// Events sent FROM server TO client over the real-time gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledged, the connection is live
    Connect { user_id: Uuid, username: String },

    /// A user came online
    UserOnline { user_id: Uuid, username: String },

    /// A user went offline
    UserOffline { user_id: Uuid },

    /// A user started typing in a conversation
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// A user stopped typing in a conversation
    StopTyping { conversation_id: Uuid, user_id: Uuid },

    /// A message posted by another user
    ReceiveMessage { message: Message },

    /// Confirmation of a message this client sent, echoing its local id
    MessageSent { client_id: Uuid, message: Message },

    /// Rejection of a message this client sent, echoing its local id
    MessageFailed { client_id: Uuid, reason: String },

    /// A member read a conversation up to `read_at`
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    },

    PostCreated { post: Post },

    /// Likes or comments changed on a post
    PostUpdated { post: Post },

    /// Current top of the leaderboard after a check-in
    LeaderboardUpdated { entries: Vec<LeaderboardEntry> },

    /// A command from this client was refused. `conversation_id` is set when
    /// the refusal concerns a specific conversation, e.g. a room join.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Uuid>,
    },
}

impl ServerEvent {
    /// Returns the conversation room this event is scoped to. Scoped events
    /// are only delivered to connections that joined the room.
    pub fn scope(&self) -> Option<Uuid> {
        match self {
            Self::Typing { conversation_id, .. } | Self::StopTyping { conversation_id, .. } => {
                Some(*conversation_id)
            }
            _ => None,
        }
    }

    /// Returns the conversation whose members are the only valid audience,
    /// whether or not they have its room open.
    pub fn members_only(&self) -> Option<Uuid> {
        match self {
            Self::ReceiveMessage { message } => Some(message.conversation_id),
            Self::MessagesRead { conversation_id, .. } => Some(*conversation_id),
            _ => None,
        }
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::UserOnline { .. } => "user_online",
            Self::UserOffline { .. } => "user_offline",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::ReceiveMessage { .. } => "receive_message",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageFailed { .. } => "message_failed",
            Self::MessagesRead { .. } => "messages_read",
            Self::PostCreated { .. } => "post_created",
            Self::PostUpdated { .. } => "post_updated",
            Self::LeaderboardUpdated { .. } => "leaderboard_updated",
            Self::Error { .. } => "error",
        }
    }
}

/// Commands sent FROM client TO server over the real-time gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Post a message. `client_id` is generated locally and echoed back in
    /// `message_sent` / `message_failed`.
    SendMessage {
        client_id: Uuid,
        conversation_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media: Option<MediaDescriptor>,
    },

    Typing { conversation_id: Uuid },

    StopTyping { conversation_id: Uuid },

    /// Receive scoped events for a direct conversation
    JoinRoom { conversation_id: Uuid },

    LeaveRoom { conversation_id: Uuid },

    /// Receive scoped events for a group conversation
    JoinGroup { group_id: Uuid },

    LeaveGroup { group_id: Uuid },

    MarkAsRead { conversation_id: Uuid },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::JoinGroup { .. } => "join_group",
            Self::LeaveGroup { .. } => "leave_group",
            Self::MarkAsRead { .. } => "mark_as_read",
        }
    }
}
