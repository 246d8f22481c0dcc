use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use stride_types::events::ClientCommand;
use stride_types::models::{Conversation, DeliveryStatus, MediaDescriptor, Message, is_blank_content};

/// Local confirmation state of a message this client originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Pending,
    Confirmed,
    Failed { reason: String },
}

/// One message in a thread as held by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEntry {
    /// Id this client generated when sending; `None` for messages that
    /// arrived from elsewhere.
    pub client_id: Option<Uuid>,
    pub message: Message,
    pub delivery: Delivery,
}

/// Content the user wants to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub conversation_id: Uuid,
    pub text: Option<String>,
    pub media: Option<MediaDescriptor>,
}

impl Draft {
    pub fn text(conversation_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            text: Some(text.into()),
            media: None,
        }
    }

    pub fn media(conversation_id: Uuid, media: MediaDescriptor) -> Self {
        Self {
            conversation_id,
            text: None,
            media: Some(media),
        }
    }

    pub fn is_blank(&self) -> bool {
        is_blank_content(self.text.as_deref(), self.media.as_ref())
    }
}

/// Outcome of applying a `receive_message` event.
#[derive(Debug, PartialEq)]
pub struct Received {
    pub conversation_id: Uuid,
    /// Set when the conversation is active: it was marked read locally and
    /// the server should be told.
    pub mark_read: Option<ClientCommand>,
    /// The conversation is not in the local list yet.
    pub unknown_conversation: bool,
}

/// Conversation list, message threads and optimistic sends.
#[derive(Debug)]
pub struct MessageRelay {
    user_id: Uuid,
    /// Pinned first, then most recent activity.
    conversations: Vec<Conversation>,
    threads: HashMap<Uuid, Vec<ThreadEntry>>,
    /// Newest message timestamp this user has read, per conversation.
    read_markers: HashMap<Uuid, DateTime<Utc>>,
    /// conversation -> reader -> read_at, for other members.
    peer_reads: HashMap<Uuid, HashMap<Uuid, DateTime<Utc>>>,
    active: Option<Uuid>,
}

impl MessageRelay {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            conversations: Vec::new(),
            threads: HashMap::new(),
            read_markers: HashMap::new(),
            peer_reads: HashMap::new(),
            active: None,
        }
    }

    // -- Conversations --

    pub fn load_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        self.sort();
    }

    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.sort();
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn unread_count(&self, id: Uuid) -> u32 {
        self.conversation(id).map_or(0, |c| c.unread_count)
    }

    pub fn active(&self) -> Option<Uuid> {
        self.active
    }

    pub fn set_active(&mut self, id: Option<Uuid>) {
        self.active = id;
    }

    /// Flips the local pin flag. `None` for an unknown conversation.
    pub fn toggle_pin(&mut self, id: Uuid) -> Option<bool> {
        let conversation = self.conversations.iter_mut().find(|c| c.id == id)?;
        conversation.pinned = !conversation.pinned;
        let pinned = conversation.pinned;
        self.sort();
        Some(pinned)
    }

    pub fn toggle_mute(&mut self, id: Uuid) -> Option<bool> {
        let conversation = self.conversations.iter_mut().find(|c| c.id == id)?;
        conversation.muted = !conversation.muted;
        Some(conversation.muted)
    }

    fn sort(&mut self) {
        self.conversations
            .sort_by(|a, b| b.pinned.cmp(&a.pinned).then(b.updated_at.cmp(&a.updated_at)));
    }

    /// Updates the summary and moves the conversation up.
    fn bump(&mut self, message: &Message) {
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            conversation.last_message = Some(message.summary());
            conversation.updated_at = conversation.updated_at.max(message.created_at);
            self.sort();
        }
    }

    // -- Threads --

    /// Replaces the server-side history of a thread. Local messages still
    /// pending or failed are kept after it.
    pub fn load_history(&mut self, conversation_id: Uuid, messages: Vec<Message>) {
        let unconfirmed: Vec<ThreadEntry> = self
            .threads
            .remove(&conversation_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.delivery != Delivery::Confirmed)
            .collect();

        let mut thread: Vec<ThreadEntry> = messages
            .into_iter()
            .map(|message| ThreadEntry {
                client_id: None,
                message,
                delivery: Delivery::Confirmed,
            })
            .collect();
        thread.extend(unconfirmed);
        self.threads.insert(conversation_id, thread);
    }

    pub fn thread(&self, conversation_id: Uuid) -> &[ThreadEntry] {
        self.threads.get(&conversation_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entry(&self, client_id: Uuid) -> Option<&ThreadEntry> {
        self.threads
            .values()
            .flatten()
            .find(|e| e.client_id == Some(client_id))
    }

    fn entry_mut(&mut self, client_id: Uuid) -> Option<&mut ThreadEntry> {
        self.threads
            .values_mut()
            .flatten()
            .find(|e| e.client_id == Some(client_id))
    }

    fn contains_message(&self, message: &Message) -> bool {
        self.thread(message.conversation_id)
            .iter()
            .any(|e| e.delivery == Delivery::Confirmed && e.message.id == message.id)
    }

    // -- Sending --

    /// Appends a pending local copy and returns its client id with the
    /// command to emit. Blank drafts change nothing.
    pub fn send(&mut self, draft: Draft, now: DateTime<Utc>) -> Option<(Uuid, ClientCommand)> {
        if draft.is_blank() {
            return None;
        }

        let client_id = Uuid::new_v4();
        let text = draft.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let message = Message {
            id: client_id,
            conversation_id: draft.conversation_id,
            sender_id: self.user_id,
            text,
            media: draft.media,
            created_at: now,
            status: DeliveryStatus::Sent,
        };
        let command = send_command(client_id, &message);

        self.bump(&message);
        self.threads
            .entry(draft.conversation_id)
            .or_default()
            .push(ThreadEntry {
                client_id: Some(client_id),
                message,
                delivery: Delivery::Pending,
            });

        Some((client_id, command))
    }

    /// Marks a pending message failed. Returns its conversation.
    pub fn fail(&mut self, client_id: Uuid, reason: impl Into<String>) -> Option<Uuid> {
        let entry = self.entry_mut(client_id)?;
        if entry.delivery == Delivery::Confirmed {
            return None;
        }
        entry.delivery = Delivery::Failed {
            reason: reason.into(),
        };
        Some(entry.message.conversation_id)
    }

    /// Fails every pending message, e.g. when the connection drops before
    /// the server confirmed them. Returns `(conversation, client_id)` pairs.
    pub fn fail_pending(&mut self, reason: &str) -> Vec<(Uuid, Uuid)> {
        let mut failed = Vec::new();
        for entry in self.threads.values_mut().flatten() {
            if entry.delivery != Delivery::Pending {
                continue;
            }
            entry.delivery = Delivery::Failed {
                reason: reason.to_string(),
            };
            if let Some(client_id) = entry.client_id {
                failed.push((entry.message.conversation_id, client_id));
            }
        }
        failed
    }

    /// Replaces the pending copy with the stored message.
    pub fn confirm(&mut self, client_id: Uuid, message: Message) -> bool {
        if self.contains_message(&message) {
            return false;
        }
        match self.entry_mut(client_id) {
            Some(entry) => {
                entry.message = message.clone();
                entry.delivery = Delivery::Confirmed;
            }
            None => self
                .threads
                .entry(message.conversation_id)
                .or_default()
                .push(ThreadEntry {
                    client_id: Some(client_id),
                    message: message.clone(),
                    delivery: Delivery::Confirmed,
                }),
        }
        self.bump(&message);
        true
    }

    /// Moves a failed message back to pending and returns the command that
    /// re-sends it under the same client id.
    pub fn retry(&mut self, client_id: Uuid) -> Option<ClientCommand> {
        let entry = self.entry_mut(client_id)?;
        if !matches!(entry.delivery, Delivery::Failed { .. }) {
            return None;
        }
        entry.delivery = Delivery::Pending;
        Some(send_command(client_id, &entry.message))
    }

    /// Removes a failed message. Returns its conversation.
    pub fn discard(&mut self, client_id: Uuid) -> Option<Uuid> {
        let conversation_id = self.entry(client_id).and_then(|e| {
            matches!(e.delivery, Delivery::Failed { .. }).then_some(e.message.conversation_id)
        })?;
        if let Some(thread) = self.threads.get_mut(&conversation_id) {
            thread.retain(|e| e.client_id != Some(client_id));
        }
        Some(conversation_id)
    }

    // -- Receiving --

    /// Applies an inbound message. `None` if it was already known.
    pub fn receive(&mut self, message: Message) -> Option<Received> {
        if self.contains_message(&message) {
            return None;
        }
        let conversation_id = message.conversation_id;
        let own = message.sender_id == self.user_id;

        self.bump(&message);
        self.threads
            .entry(conversation_id)
            .or_default()
            .push(ThreadEntry {
                client_id: None,
                message,
                delivery: Delivery::Confirmed,
            });

        let unknown_conversation = self.conversation(conversation_id).is_none();
        let mut mark_read = None;
        if !own {
            if self.active == Some(conversation_id) {
                mark_read = Some(self.mark_as_read(conversation_id));
            } else if let Some(conversation) =
                self.conversations.iter_mut().find(|c| c.id == conversation_id)
            {
                conversation.unread_count += 1;
            }
        }

        Some(Received {
            conversation_id,
            mark_read,
            unknown_conversation,
        })
    }

    /// Zeroes the unread count, marks received messages read and returns the
    /// command telling the server.
    pub fn mark_as_read(&mut self, conversation_id: Uuid) -> ClientCommand {
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            conversation.unread_count = 0;
        }

        let user_id = self.user_id;
        let mut newest = None;
        if let Some(thread) = self.threads.get_mut(&conversation_id) {
            for entry in thread.iter_mut().filter(|e| e.message.sender_id != user_id) {
                entry.message.status = entry.message.status.advance(DeliveryStatus::Read);
            }
            newest = thread.iter().map(|e| e.message.created_at).max();
        }
        if let Some(newest) = newest {
            let marker = self.read_markers.entry(conversation_id).or_insert(newest);
            *marker = (*marker).max(newest);
        }

        ClientCommand::MarkAsRead { conversation_id }
    }

    pub fn read_marker(&self, conversation_id: Uuid) -> Option<DateTime<Utc>> {
        self.read_markers.get(&conversation_id).copied()
    }

    /// Applies a `messages_read` receipt. Own messages become `read` once
    /// every other participant has read past them.
    pub fn messages_read(&mut self, conversation_id: Uuid, reader_id: Uuid, read_at: DateTime<Utc>) -> bool {
        if reader_id == self.user_id {
            // Read on another device
            if self.unread_count(conversation_id) == 0 {
                return false;
            }
            self.mark_as_read(conversation_id);
            return true;
        }

        let reads = self.peer_reads.entry(conversation_id).or_default();
        let marker = reads.entry(reader_id).or_insert(read_at);
        *marker = (*marker).max(read_at);

        let others: Vec<Uuid> = match self.conversation(conversation_id) {
            Some(c) => c.participants.iter().copied().filter(|p| *p != self.user_id).collect(),
            None => vec![reader_id],
        };
        let reads = self.peer_reads.get(&conversation_id).cloned().unwrap_or_default();

        let user_id = self.user_id;
        let mut changed = false;
        if let Some(thread) = self.threads.get_mut(&conversation_id) {
            for entry in thread
                .iter_mut()
                .filter(|e| e.message.sender_id == user_id && e.delivery == Delivery::Confirmed)
            {
                let created_at = entry.message.created_at;
                let read_by_all = others
                    .iter()
                    .all(|p| reads.get(p).is_some_and(|at| *at >= created_at));
                if read_by_all && entry.message.status != DeliveryStatus::Read {
                    entry.message.status = entry.message.status.advance(DeliveryStatus::Read);
                    changed = true;
                }
            }
        }
        changed
    }
}

fn send_command(client_id: Uuid, message: &Message) -> ClientCommand {
    ClientCommand::SendMessage {
        client_id,
        conversation_id: message.conversation_id,
        text: message.text.clone(),
        media: message.media.clone(),
    }
}
