use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use stride_types::models::{
    Conversation, ConversationKind, LastMessage, MediaDescriptor, Message, is_blank_content,
};
use uuid::Uuid;

use super::OptionalExt;
use crate::models::{ConversationRow, MessageRow};
use crate::{Database, now, parse_timestamp, timestamp};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, text, media, status, created_at";

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
    pub media: Option<MediaDescriptor>,
}

#[derive(Debug)]
pub enum MessageSendOutcome {
    Sent(Message),
    /// Neither text nor media.
    Empty,
    /// The sender is not a member of the conversation (or it does not exist).
    NotMember,
}

impl Database {
    // -- Conversations --

    /// Returns the direct conversation between two users, creating it on
    /// first use. `None` if `other_id` is unknown or equals `user_id`.
    pub fn get_or_create_direct(&self, user_id: Uuid, other_id: Uuid) -> Result<Option<Conversation>> {
        if user_id == other_id {
            return Ok(None);
        }
        self.with_conn_mut(|conn| {
            if !super::users::user_exists(conn, other_id)? {
                return Ok(None);
            }

            let existing: Option<String> = conn
                .query_row(
                    "SELECT c.id FROM conversations c
                     JOIN conversation_members a ON a.conversation_id = c.id AND a.user_id = ?1
                     JOIN conversation_members b ON b.conversation_id = c.id AND b.user_id = ?2
                     WHERE c.kind = 'direct'",
                    (user_id.to_string(), other_id.to_string()),
                    |row| row.get(0),
                )
                .optional()?;

            let conversation_id = match existing {
                Some(id) => id.parse()?,
                None => {
                    let id = Uuid::new_v4();
                    insert_conversation(conn, id, ConversationKind::Direct, "", user_id)?;
                    insert_member(conn, id, user_id)?;
                    insert_member(conn, id, other_id)?;
                    id
                }
            };

            query_conversation(conn, user_id, conversation_id)
        })
    }

    /// Creates a group conversation. Unknown member ids are ignored; the
    /// creator is always a member.
    pub fn create_group(&self, creator_id: Uuid, name: &str, member_ids: &[Uuid]) -> Result<Conversation> {
        self.with_conn_mut(|conn| {
            let id = Uuid::new_v4();
            insert_conversation(conn, id, ConversationKind::Group, name.trim(), creator_id)?;
            insert_member(conn, id, creator_id)?;
            for member in member_ids {
                if *member != creator_id && super::users::user_exists(conn, *member)? {
                    insert_member(conn, id, *member)?;
                }
            }
            query_conversation(conn, creator_id, id)?
                .ok_or_else(|| anyhow::anyhow!("Group vanished after insert: {}", id))
        })
    }

    /// Adds `user_id` to a group. `None` if there is no such group.
    pub fn join_group(&self, user_id: Uuid, group_id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn_mut(|conn| {
            let kind: Option<String> = conn
                .query_row(
                    "SELECT kind FROM conversations WHERE id = ?1",
                    [group_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if kind.as_deref() != Some(ConversationKind::Group.as_str()) {
                return Ok(None);
            }
            if !is_member(conn, user_id, group_id)? {
                insert_member(conn, group_id, user_id)?;
            }
            query_conversation(conn, user_id, group_id)
        })
    }

    pub fn leave_group(&self, user_id: Uuid, group_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM conversation_members
                 WHERE conversation_id = ?1 AND user_id = ?2
                   AND conversation_id IN (SELECT id FROM conversations WHERE kind = 'group')",
                (group_id.to_string(), user_id.to_string()),
            )?;
            Ok(n > 0)
        })
    }

    pub fn is_member(&self, user_id: Uuid, conversation_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| is_member(conn, user_id, conversation_id))
    }

    /// Ids of everyone in the conversation. Empty if it does not exist.
    pub fn conversation_members(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_members WHERE conversation_id = ?1
                 ORDER BY joined_at, rowid",
            )?;
            let ids = stmt
                .query_map([conversation_id.to_string()], |r| r.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut members = Vec::with_capacity(ids.len());
            for id in ids {
                members.push(id.parse::<Uuid>()?);
            }
            Ok(members)
        })
    }

    /// Conversations of `user_id`: pinned first, then most recent activity.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!("{} ORDER BY m.pinned DESC, c.updated_at DESC", conversation_select(false));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], read_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|row| hydrate_conversation(conn, user_id, row))
                .collect()
        })
    }

    pub fn get_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, user_id, conversation_id))
    }

    pub fn toggle_pin(&self, user_id: Uuid, conversation_id: Uuid) -> Result<Option<bool>> {
        self.with_conn_mut(|conn| toggle_member_flag(conn, "pinned", user_id, conversation_id))
    }

    pub fn toggle_mute(&self, user_id: Uuid, conversation_id: Uuid) -> Result<Option<bool>> {
        self.with_conn_mut(|conn| toggle_member_flag(conn, "muted", user_id, conversation_id))
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage) -> Result<MessageSendOutcome> {
        if is_blank_content(msg.text.as_deref(), msg.media.as_ref()) {
            return Ok(MessageSendOutcome::Empty);
        }
        let media = msg.media.as_ref().map(serde_json::to_string).transpose()?;
        let text = msg
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        self.with_conn_mut(|conn| {
            if !is_member(conn, msg.sender_id, msg.conversation_id)? {
                return Ok(MessageSendOutcome::NotMember);
            }

            let id = Uuid::new_v4();
            let created_at = now();
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, text, media, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'sent', ?6)",
                rusqlite::params![
                    id.to_string(),
                    msg.conversation_id.to_string(),
                    msg.sender_id.to_string(),
                    text,
                    media,
                    created_at,
                ],
            )?;
            conn.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                (msg.conversation_id.to_string(), &created_at),
            )?;

            let message = query_message(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Message vanished after insert: {}", id))?;
            Ok(MessageSendOutcome::Sent(message))
        })
    }

    /// A page of up to `limit` messages older than `before` (or the newest),
    /// oldest first. Fetching marks other members' messages as delivered.
    /// `None` if `user_id` is not a member.
    pub fn list_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Option<Vec<Message>>> {
        self.with_conn_mut(|conn| {
            if !is_member(conn, user_id, conversation_id)? {
                return Ok(None);
            }

            conn.execute(
                "UPDATE messages SET status = 'delivered'
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND status = 'sent'",
                (conversation_id.to_string(), user_id.to_string()),
            )?;

            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id.to_string(), before.map(timestamp), limit],
                    read_message_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut messages = rows
                .into_iter()
                .map(MessageRow::into_message)
                .collect::<Result<Vec<_>>>()?;
            messages.reverse();
            Ok(Some(messages))
        })
    }

    /// Moves the read marker of `user_id` to now. Messages every other member
    /// has read become `read`. Returns the marker, or `None` if not a member.
    pub fn mark_read(&self, user_id: Uuid, conversation_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        self.with_conn_mut(|conn| {
            let read_at = now();
            let n = conn.execute(
                "UPDATE conversation_members SET last_read_at = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id.to_string(), user_id.to_string(), &read_at),
            )?;
            if n == 0 {
                return Ok(None);
            }

            conn.execute(
                "UPDATE messages SET status = 'read'
                 WHERE conversation_id = ?1 AND status != 'read' AND created_at <= ?2
                   AND NOT EXISTS (
                       SELECT 1 FROM conversation_members cm
                       WHERE cm.conversation_id = messages.conversation_id
                         AND cm.user_id != messages.sender_id
                         AND (cm.last_read_at IS NULL OR cm.last_read_at < messages.created_at))",
                (conversation_id.to_string(), &read_at),
            )?;

            Ok(Some(parse_timestamp(&read_at)?))
        })
    }
}

fn insert_conversation(
    conn: &Connection,
    id: Uuid,
    kind: ConversationKind,
    name: &str,
    created_by: Uuid,
) -> Result<()> {
    let at = now();
    conn.execute(
        "INSERT INTO conversations (id, kind, name, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        (id.to_string(), kind.as_str(), name, created_by.to_string(), at),
    )?;
    Ok(())
}

fn insert_member(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
        (conversation_id.to_string(), user_id.to_string(), now()),
    )?;
    Ok(())
}

fn is_member(conn: &Connection, user_id: Uuid, conversation_id: Uuid) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
            (conversation_id.to_string(), user_id.to_string()),
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn toggle_member_flag(
    conn: &Connection,
    column: &str,
    user_id: Uuid,
    conversation_id: Uuid,
) -> Result<Option<bool>> {
    let sql = format!(
        "UPDATE conversation_members SET {col} = 1 - {col}
         WHERE conversation_id = ?1 AND user_id = ?2
         RETURNING {col}",
        col = column
    );
    conn.query_row(&sql, (conversation_id.to_string(), user_id.to_string()), |row| {
        row.get::<_, bool>(0)
    })
    .optional()
}

/// Per-member conversation select. `?1` is the viewing user; with
/// `single` set, `?2` restricts to one conversation.
fn conversation_select(single: bool) -> String {
    format!(
        "SELECT c.id, c.kind, c.name, m.pinned, m.muted,
                (SELECT COUNT(*) FROM messages msg
                 WHERE msg.conversation_id = c.id
                   AND msg.sender_id != ?1
                   AND msg.status != 'read'
                   AND (m.last_read_at IS NULL OR msg.created_at > m.last_read_at)),
                c.updated_at
         FROM conversations c
         JOIN conversation_members m ON m.conversation_id = c.id AND m.user_id = ?1
         {}",
        if single { "WHERE c.id = ?2" } else { "" }
    )
}

fn read_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        pinned: row.get(3)?,
        muted: row.get(4)?,
        unread_count: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        media: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_conversation(conn: &Connection, user_id: Uuid, conversation_id: Uuid) -> Result<Option<Conversation>> {
    let sql = conversation_select(true);
    let row = conn
        .query_row(&sql, (user_id.to_string(), conversation_id.to_string()), read_conversation_row)
        .optional()?;
    row.map(|row| hydrate_conversation(conn, user_id, row)).transpose()
}

/// Attaches participants and the last message. Direct conversations are
/// named after the other participant.
fn hydrate_conversation(conn: &Connection, user_id: Uuid, mut row: ConversationRow) -> Result<Conversation> {
    let mut stmt = conn.prepare(
        "SELECT m.user_id, u.display_name FROM conversation_members m
         JOIN users u ON u.id = m.user_id
         WHERE m.conversation_id = ?1
         ORDER BY m.joined_at, m.rowid",
    )?;
    let members = stmt
        .query_map([&row.id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut participants = Vec::with_capacity(members.len());
    for (id, display_name) in members {
        let id: Uuid = id.parse()?;
        if row.kind == ConversationKind::Direct.as_str() && id != user_id {
            row.name = display_name;
        }
        participants.push(id);
    }

    let last_message: Option<LastMessage> = {
        let sql = format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            MESSAGE_COLUMNS
        );
        conn.query_row(&sql, [&row.id], read_message_row)
            .optional()?
            .map(MessageRow::into_message)
            .transpose()?
            .map(|m| m.summary())
    };

    row.into_conversation(participants, last_message)
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    conn.query_row(&sql, [id.to_string()], read_message_row)
        .optional()?
        .map(MessageRow::into_message)
        .transpose()
}
