use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    /// Time of the most recent `typing` event for this entry.
    pub last_seen: Instant,
}

/// Online users and typing indicators, derived from gateway events. Memory
/// only; cleared on disconnect.
#[derive(Debug)]
pub struct PresenceTracker {
    online: HashSet<Uuid>,
    typing: HashMap<(Uuid, Uuid), TypingEntry>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            online: HashSet::new(),
            typing: HashMap::new(),
            ttl,
        }
    }

    /// Returns whether the online set changed.
    pub fn user_online(&mut self, user_id: Uuid) -> bool {
        self.online.insert(user_id)
    }

    /// Returns whether the online set changed. An offline user stops typing
    /// everywhere.
    pub fn user_offline(&mut self, user_id: Uuid) -> bool {
        self.typing.retain(|(_, user), _| *user != user_id);
        self.online.remove(&user_id)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains(&user_id)
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        self.online.iter().copied().collect()
    }

    /// Upserts a typing entry. Returns true if the entry is new.
    pub fn typing_started(&mut self, conversation_id: Uuid, user_id: Uuid, username: String, now: Instant) -> bool {
        match self.typing.get_mut(&(conversation_id, user_id)) {
            Some(entry) => {
                entry.last_seen = now;
                false
            }
            None => {
                self.typing.insert(
                    (conversation_id, user_id),
                    TypingEntry {
                        conversation_id,
                        user_id,
                        username,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    pub fn typing_stopped(&mut self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.typing.remove(&(conversation_id, user_id)).is_some()
    }

    /// Drops every entry scoped to `conversation_id`.
    pub fn drop_conversation(&mut self, conversation_id: Uuid) -> bool {
        let before = self.typing.len();
        self.typing.retain(|(conv, _), _| *conv != conversation_id);
        self.typing.len() != before
    }

    /// Removes entries older than the TTL. Returns the affected
    /// conversations.
    pub fn expire(&mut self, now: Instant) -> Vec<Uuid> {
        let ttl = self.ttl;
        let mut affected = HashSet::new();
        self.typing.retain(|(conv, _), entry| {
            let alive = now.saturating_duration_since(entry.last_seen) < ttl;
            if !alive {
                affected.insert(*conv);
            }
            alive
        });
        affected.into_iter().collect()
    }

    /// Who is typing in a conversation, ordered by username.
    pub fn typing_in(&self, conversation_id: Uuid) -> Vec<TypingEntry> {
        let mut entries: Vec<TypingEntry> = self
            .typing
            .values()
            .filter(|e| e.conversation_id == conversation_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.username.cmp(&b.username));
        entries
    }

    /// Conversations where `user_id` is currently typing.
    pub fn typing_of(&self, user_id: Uuid) -> Vec<Uuid> {
        self.typing
            .keys()
            .filter(|(_, user)| *user == user_id)
            .map(|(conv, _)| *conv)
            .collect()
    }

    pub fn typing_conversations(&self) -> HashSet<Uuid> {
        self.typing.keys().map(|(conv, _)| *conv).collect()
    }

    pub fn clear(&mut self) {
        self.online.clear();
        self.typing.clear();
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_set_is_idempotent() {
        let mut presence = PresenceTracker::new(Duration::from_secs(8));
        let user = Uuid::new_v4();
        assert!(presence.user_online(user));
        assert!(!presence.user_online(user));
        assert!(presence.is_online(user));
        assert!(presence.user_offline(user));
        assert!(!presence.user_offline(user));
        assert!(presence.online_users().is_empty());
    }

    #[test]
    fn typing_upserts_and_stops() {
        let mut presence = PresenceTracker::new(Duration::from_secs(8));
        let (conv, user) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Instant::now();

        assert!(presence.typing_started(conv, user, "ana".into(), now));
        assert!(!presence.typing_started(conv, user, "ana".into(), now));
        assert_eq!(presence.typing_in(conv).len(), 1);

        assert!(presence.typing_stopped(conv, user));
        assert!(presence.typing_in(conv).is_empty());
    }

    #[test]
    fn entries_expire_after_ttl_from_last_event() {
        let mut presence = PresenceTracker::new(Duration::from_secs(8));
        let (conv, ana, ben) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let t0 = Instant::now();

        presence.typing_started(conv, ana, "ana".into(), t0);
        presence.typing_started(conv, ben, "ben".into(), t0);
        // ana keeps typing
        presence.typing_started(conv, ana, "ana".into(), t0 + Duration::from_secs(5));

        assert!(presence.expire(t0 + Duration::from_secs(7)).is_empty());
        assert_eq!(presence.expire(t0 + Duration::from_secs(9)), vec![conv]);

        let left = presence.typing_in(conv);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_id, ana);
    }

    #[test]
    fn going_offline_or_leaving_clears_typing() {
        let mut presence = PresenceTracker::new(Duration::from_secs(8));
        let (a, b, user) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let now = Instant::now();

        presence.user_online(user);
        presence.typing_started(a, user, "ana".into(), now);
        presence.typing_started(b, Uuid::new_v4(), "ben".into(), now);

        presence.user_offline(user);
        assert!(presence.typing_in(a).is_empty());

        assert!(presence.drop_conversation(b));
        assert!(presence.typing_conversations().is_empty());
    }
}
