//! In-memory presence: which room each identity is currently viewing.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use roomcast_core::{PresenceAction, RoomId, UserId};
use tracing::{debug, warn};

/// Room → present identities. An identity is present in at most one room.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    rooms: Mutex<HashMap<RoomId, HashSet<UserId>>>,
}

impl PresenceTracker {
    /// Nobody present anywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `user_id` present in `room_id`, clearing it from every other room first.
    pub fn enter(&self, room_id: RoomId, user_id: UserId) {
        let mut rooms = self.rooms.lock();
        remove_everywhere(&mut rooms, user_id);
        let _ = rooms.entry(room_id).or_default().insert(user_id);
        debug!(room_id = %room_id, user_id = %user_id, "presence enter");
    }

    /// Clear `user_id` from `room_id` only. Empty rooms are pruned.
    pub fn leave(&self, room_id: RoomId, user_id: UserId) {
        let mut rooms = self.rooms.lock();
        if let Some(present) = rooms.get_mut(&room_id) {
            let _ = present.remove(&user_id);
            if present.is_empty() {
                let _ = rooms.remove(&room_id);
            }
        }
        debug!(room_id = %room_id, user_id = %user_id, "presence leave");
    }

    /// Whether `user_id` is currently viewing `room_id`.
    pub fn is_present(&self, room_id: RoomId, user_id: UserId) -> bool {
        self.rooms
            .lock()
            .get(&room_id)
            .is_some_and(|present| present.contains(&user_id))
    }

    /// Snapshot of the identities present in `room_id`.
    pub fn present_set(&self, room_id: RoomId) -> HashSet<UserId> {
        self.rooms.lock().get(&room_id).cloned().unwrap_or_default()
    }

    /// Remove the identity from every room. Returns how many rooms it was cleared from.
    pub fn clear_all_for(&self, user_id: UserId) -> usize {
        let cleared = remove_everywhere(&mut self.rooms.lock(), user_id);
        if cleared > 0 {
            debug!(user_id = %user_id, cleared, "presence cleared");
        }
        cleared
    }

    /// Apply a wire action (`enter` / `leave`). Unknown actions are logged and ignored.
    pub fn apply(&self, room_id: RoomId, user_id: UserId, action: &str) -> Option<PresenceAction> {
        let parsed = PresenceAction::parse(action);
        match parsed {
            Some(PresenceAction::Enter) => self.enter(room_id, user_id),
            Some(PresenceAction::Leave) => self.leave(room_id, user_id),
            None => warn!(room_id = %room_id, user_id = %user_id, action, "unknown presence action"),
        }
        parsed
    }

    /// The room the identity is currently present in, if any.
    pub fn room_of(&self, user_id: UserId) -> Option<RoomId> {
        self.rooms
            .lock()
            .iter()
            .find_map(|(room_id, present)| present.contains(&user_id).then_some(*room_id))
    }
}

fn remove_everywhere(rooms: &mut HashMap<RoomId, HashSet<UserId>>, user_id: UserId) -> usize {
    let mut cleared = 0;
    rooms.retain(|_, present| {
        if present.remove(&user_id) {
            cleared += 1;
        }
        !present.is_empty()
    });
    cleared
}
