//! Database row types. These map directly to SQLite rows and are converted
//! into the shared stride-types models at the edge of the db layer.

use anyhow::{Context, Result};
use stride_types::models::{
    CheckIn, Comment, Conversation, Goal, LastMessage, MediaDescriptor, Message,
    PartnerConnection, Post, UserProfile,
};
use uuid::Uuid;

use crate::parse_timestamp;

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

fn parse_media(raw: Option<&str>) -> Result<Option<MediaDescriptor>> {
    raw.map(|json| serde_json::from_str(json).with_context(|| format!("Corrupt media '{}'", json)))
        .transpose()
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub bio: String,
    pub fitness_level: String,
    pub interests: String,
    pub onboarded: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn into_profile(self) -> Result<UserProfile> {
        Ok(UserProfile {
            id: parse_id(&self.id)?,
            username: self.username,
            display_name: self.display_name,
            bio: self.bio,
            fitness_level: self.fitness_level.parse()?,
            interests: serde_json::from_str(&self.interests)
                .with_context(|| format!("Corrupt interests on user '{}'", self.id))?,
            onboarded: self.onboarded,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct GoalRow {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub frequency: String,
    pub target_check_ins: u32,
    pub completed_check_ins: u32,
    pub status: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl GoalRow {
    pub fn into_goal(self) -> Result<Goal> {
        Ok(Goal {
            id: parse_id(&self.id)?,
            owner_id: parse_id(&self.owner_id)?,
            title: self.title,
            description: self.description,
            category: self.category,
            frequency: self.frequency.parse()?,
            target_check_ins: self.target_check_ins,
            completed_check_ins: self.completed_check_ins,
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

pub struct CheckInRow {
    pub id: String,
    pub goal_id: String,
    pub period: String,
    pub note: Option<String>,
    pub created_at: String,
}

impl CheckInRow {
    pub fn into_check_in(self) -> Result<CheckIn> {
        Ok(CheckIn {
            id: parse_id(&self.id)?,
            goal_id: parse_id(&self.goal_id)?,
            period: self.period,
            note: self.note,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub category: String,
    pub media: Option<String>,
    pub like_count: u32,
    pub comment_count: u32,
    pub liked_by_me: bool,
    pub created_at: String,
}

impl PostRow {
    pub fn into_post(self) -> Result<Post> {
        Ok(Post {
            id: parse_id(&self.id)?,
            author_id: parse_id(&self.author_id)?,
            author_username: self.author_username,
            content: self.content,
            category: self.category,
            media: parse_media(self.media.as_deref())?,
            like_count: self.like_count,
            comment_count: self.comment_count,
            liked_by_me: self.liked_by_me,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub created_at: String,
}

impl CommentRow {
    pub fn into_comment(self) -> Result<Comment> {
        Ok(Comment {
            id: parse_id(&self.id)?,
            post_id: parse_id(&self.post_id)?,
            author_id: parse_id(&self.author_id)?,
            author_username: self.author_username,
            content: self.content,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct PartnerRow {
    pub id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub status: String,
    pub created_at: String,
    pub responded_at: Option<String>,
}

impl PartnerRow {
    pub fn into_connection(self) -> Result<PartnerConnection> {
        Ok(PartnerConnection {
            id: parse_id(&self.id)?,
            requester_id: parse_id(&self.requester_id)?,
            recipient_id: parse_id(&self.recipient_id)?,
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            responded_at: self.responded_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub media: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            conversation_id: parse_id(&self.conversation_id)?,
            sender_id: parse_id(&self.sender_id)?,
            text: self.text,
            media: parse_media(self.media.as_deref())?,
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// One conversation as seen by one member, before participants and the last
/// message are attached.
pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub pinned: bool,
    pub muted: bool,
    pub unread_count: u32,
    pub updated_at: String,
}

impl ConversationRow {
    pub fn into_conversation(
        self,
        participants: Vec<Uuid>,
        last_message: Option<LastMessage>,
    ) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_id(&self.id)?,
            kind: self.kind.parse()?,
            name: self.name,
            participants,
            last_message,
            unread_count: self.unread_count,
            pinned: self.pinned,
            muted: self.muted,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
