use std::collections::HashSet;

use uuid::Uuid;

use stride_types::events::ClientCommand;

/// Result of changing the active conversation.
#[derive(Debug, Default, PartialEq)]
pub struct Selection {
    /// Conversation that stopped being active, if any.
    pub previous: Option<Uuid>,
    /// Commands to emit, in order: leave the old room first, then join.
    pub commands: Vec<ClientCommand>,
}

/// Tracks which broadcast rooms this client wants to be in. Conversation
/// rooms follow the selected conversation; group rooms are joined and left
/// explicitly and survive selection changes.
#[derive(Debug, Default)]
pub struct RoomCoordinator {
    conversation_rooms: HashSet<Uuid>,
    group_rooms: HashSet<Uuid>,
    active: Option<Uuid>,
}

impl RoomCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<Uuid> {
        self.active
    }

    /// Whether the server-side room should currently be joined.
    pub fn is_joined(&self, id: Uuid) -> bool {
        self.conversation_rooms.contains(&id) || self.group_rooms.contains(&id)
    }

    pub fn joined(&self) -> Vec<Uuid> {
        self.conversation_rooms
            .union(&self.group_rooms)
            .copied()
            .collect()
    }

    pub fn join_room(&mut self, id: Uuid) -> Option<ClientCommand> {
        let already = self.is_joined(id);
        self.conversation_rooms.insert(id);
        (!already).then_some(ClientCommand::JoinRoom { conversation_id: id })
    }

    pub fn leave_room(&mut self, id: Uuid) -> Option<ClientCommand> {
        if !self.conversation_rooms.remove(&id) || self.group_rooms.contains(&id) {
            return None;
        }
        Some(ClientCommand::LeaveRoom { conversation_id: id })
    }

    pub fn join_group(&mut self, id: Uuid) -> Option<ClientCommand> {
        let already = self.is_joined(id);
        self.group_rooms.insert(id);
        (!already).then_some(ClientCommand::JoinGroup { group_id: id })
    }

    pub fn leave_group(&mut self, id: Uuid) -> Option<ClientCommand> {
        if !self.group_rooms.remove(&id) || self.conversation_rooms.contains(&id) {
            return None;
        }
        Some(ClientCommand::LeaveGroup { group_id: id })
    }

    /// Drops a room the server refused to join, so it is not retried on
    /// reconnect. The active selection is kept. Returns whether it was wanted.
    pub fn forget(&mut self, id: Uuid) -> bool {
        let room = self.conversation_rooms.remove(&id);
        let group = self.group_rooms.remove(&id);
        room || group
    }

    /// Makes `next` the active conversation. The previous conversation room is
    /// left before the new one is joined.
    pub fn select(&mut self, next: Option<Uuid>) -> Selection {
        if next == self.active {
            return Selection::default();
        }

        let previous = self.active.take();
        let mut commands = Vec::new();
        if let Some(old) = previous {
            commands.extend(self.leave_room(old));
        }
        if let Some(new) = next {
            commands.extend(self.join_room(new));
        }
        self.active = next;

        Selection { previous, commands }
    }

    /// Commands that restore every wanted room on a fresh connection.
    pub fn rejoin(&self) -> Vec<ClientCommand> {
        let groups = self
            .group_rooms
            .iter()
            .map(|&id| ClientCommand::JoinGroup { group_id: id });
        let rooms = self
            .conversation_rooms
            .difference(&self.group_rooms)
            .map(|&id| ClientCommand::JoinRoom { conversation_id: id });
        groups.chain(rooms).collect()
    }
}
