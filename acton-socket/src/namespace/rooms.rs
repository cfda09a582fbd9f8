use std::collections::HashSet;

use dashmap::DashMap;

use crate::session::SessionId;

/// Two-way room index for one namespace
///
/// `room -> sessions` answers dispatch, `session -> rooms` answers
/// disconnect cleanup. Writers lock the session's entry before touching the
/// room side, so both directions change together.
#[derive(Debug, Default)]
pub struct RoomMembership {
    room_clients: DashMap<String, HashSet<SessionId>>,
    client_rooms: DashMap<SessionId, HashSet<String>>,
}

impl RoomMembership {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `session_id` to `room`; returns `false` if it was already there
    pub fn join(&self, room: &str, session_id: SessionId) -> bool {
        let mut rooms = self.client_rooms.entry(session_id).or_default();
        if !rooms.insert(room.to_string()) {
            return false;
        }
        self.room_clients
            .entry(room.to_string())
            .or_default()
            .insert(session_id);
        true
    }

    /// Remove `session_id` from `room`; returns `false` if it was not there
    pub fn leave(&self, room: &str, session_id: SessionId) -> bool {
        let removed = match self.client_rooms.get_mut(&session_id) {
            Some(mut rooms) => {
                let removed = rooms.remove(room);
                if removed {
                    if let Some(mut members) = self.room_clients.get_mut(room) {
                        members.remove(&session_id);
                    }
                    self.room_clients.remove_if(room, |_, members| members.is_empty());
                }
                removed
            }
            None => false,
        };
        self.client_rooms
            .remove_if(&session_id, |_, rooms| rooms.is_empty());
        removed
    }

    /// Snapshot of the sessions in `room`
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<SessionId> {
        self.room_clients
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `session_id` is in `room`
    #[must_use]
    pub fn contains(&self, room: &str, session_id: SessionId) -> bool {
        self.room_clients
            .get(room)
            .is_some_and(|members| members.contains(&session_id))
    }

    /// Rooms `session_id` is in
    #[must_use]
    pub fn rooms_of(&self, session_id: SessionId) -> HashSet<String> {
        self.client_rooms
            .get(&session_id)
            .map(|rooms| rooms.value().clone())
            .unwrap_or_default()
    }

    /// Names of every non-empty room
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.room_clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of non-empty rooms
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.room_clients.len()
    }

    /// Drop every membership
    pub fn clear(&self) {
        self.client_rooms.clear();
        self.room_clients.clear();
    }
}
