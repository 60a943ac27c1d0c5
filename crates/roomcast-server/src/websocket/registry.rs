//! Who is connected where.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use roomcast_core::{RoomId, Scope, UserId};
use serde::Serialize;
use tracing::{debug, info};

use super::session::{CloseReason, Session};

#[derive(Default)]
struct Maps {
    rooms: HashMap<RoomId, Vec<Arc<Session>>>,
    global: HashMap<UserId, Arc<Session>>,
}

/// Live session counts, reported on `/health`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    /// Rooms with at least one session.
    pub rooms: usize,
    /// Room sessions across all rooms.
    pub room_sessions: usize,
    /// Identities with a global session.
    pub global_sessions: usize,
}

/// Room sessions grouped by room, plus at most one global session per identity.
///
/// Both maps live under one lock; it is never held across a network write.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Maps>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a room session. Re-adding the same session is a no-op.
    pub fn add_room_session(&self, room_id: RoomId, session: Arc<Session>) {
        let mut maps = self.inner.lock();
        let sessions = maps.rooms.entry(room_id).or_default();
        if sessions.iter().any(|s| s.id() == session.id()) {
            return;
        }
        debug!(room_id = %room_id, session_id = %session.id(), user_id = %session.user_id(), "room session added");
        sessions.push(session);
    }

    /// Returns `true` if the session was present. Empty rooms are pruned.
    pub fn remove_room_session(&self, room_id: RoomId, session: &Session) -> bool {
        let mut maps = self.inner.lock();
        let Some(sessions) = maps.rooms.get_mut(&room_id) else {
            return false;
        };
        let before = sessions.len();
        sessions.retain(|s| s.id() != session.id());
        let removed = sessions.len() != before;
        if sessions.is_empty() {
            let _ = maps.rooms.remove(&room_id);
        }
        if removed {
            debug!(room_id = %room_id, session_id = %session.id(), "room session removed");
        }
        removed
    }

    /// Snapshot of the sessions in a room, in join order.
    pub fn sessions_in_room(&self, room_id: RoomId) -> Vec<Arc<Session>> {
        self.inner.lock().rooms.get(&room_id).cloned().unwrap_or_default()
    }

    /// Install the global session for its identity. A prior session for the same
    /// identity is closed as superseded and returned.
    pub fn set_global_session(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let user_id = session.user_id();
        let mut maps = self.inner.lock();
        let evicted = maps.global.insert(user_id, Arc::clone(&session))?;
        if evicted.id() == session.id() {
            return None;
        }
        let _ = evicted.close(CloseReason::Superseded);
        info!(
            user_id = %user_id,
            evicted = %evicted.id(),
            session_id = %session.id(),
            "duplicate global login, previous session closed"
        );
        Some(evicted)
    }

    /// Remove the identity's global session only if it is still `session`.
    /// A superseded session's late teardown leaves its replacement alone.
    pub fn remove_global_session(&self, session: &Session) -> bool {
        let mut maps = self.inner.lock();
        match maps.global.get(&session.user_id()) {
            Some(current) if current.id() == session.id() => {
                let _ = maps.global.remove(&session.user_id());
                debug!(user_id = %session.user_id(), session_id = %session.id(), "global session removed");
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every global session.
    pub fn global_sessions(&self) -> Vec<Arc<Session>> {
        self.inner.lock().global.values().cloned().collect()
    }

    /// Recipients of an event addressed to `scope`.
    pub fn sessions_for(&self, scope: Scope) -> Vec<Arc<Session>> {
        match scope {
            Scope::Room(room_id) => self.sessions_in_room(room_id),
            Scope::Global => self.global_sessions(),
        }
    }

    /// Remove `session` from whichever map its scope points at.
    pub fn remove(&self, session: &Session) -> bool {
        match session.scope() {
            Scope::Room(room_id) => self.remove_room_session(room_id, session),
            Scope::Global => self.remove_global_session(session),
        }
    }

    /// Every registered session, room and global.
    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        let maps = self.inner.lock();
        maps.rooms
            .values()
            .flatten()
            .chain(maps.global.values())
            .cloned()
            .collect()
    }

    /// Whether the identity still has any room session open.
    pub fn has_room_sessions(&self, user_id: UserId) -> bool {
        self.inner
            .lock()
            .rooms
            .values()
            .flatten()
            .any(|s| s.user_id() == user_id)
    }

    /// Current sizes of both maps.
    pub fn counts(&self) -> RegistryCounts {
        let maps = self.inner.lock();
        RegistryCounts {
            rooms: maps.rooms.len(),
            room_sessions: maps.rooms.values().map(Vec::len).sum(),
            global_sessions: maps.global.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_core::Identity;

    fn room_session(user: i64, room: i64) -> Arc<Session> {
        let (session, _rx) = Session::new(
            Identity::new(UserId::new(user), format!("user{user}")),
            Scope::Room(RoomId::new(room)),
            "tok",
            8,
        );
        session
    }

    fn global_session(user: i64) -> Arc<Session> {
        let (session, _rx) = Session::new(
            Identity::new(UserId::new(user), format!("user{user}")),
            Scope::Global,
            "tok",
            8,
        );
        session
    }

    #[test]
    fn add_and_list_room_sessions() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::new(3);
        let a = room_session(7, 3);
        let b = room_session(9, 3);
        registry.add_room_session(room, a.clone());
        registry.add_room_session(room, b.clone());

        let ids: Vec<_> = registry.sessions_in_room(room).iter().map(|s| s.user_id()).collect();
        assert_eq!(ids, vec![UserId::new(7), UserId::new(9)]);
        assert!(registry.sessions_in_room(RoomId::new(4)).is_empty());
    }

    #[test]
    fn adding_same_session_twice_is_noop() {
        let registry = ConnectionRegistry::new();
        let a = room_session(7, 3);
        registry.add_room_session(RoomId::new(3), a.clone());
        registry.add_room_session(RoomId::new(3), a);
        assert_eq!(registry.counts().room_sessions, 1);
    }

    #[test]
    fn removal_is_idempotent_and_prunes_empty_rooms() {
        let registry = ConnectionRegistry::new();
        let room = RoomId::new(3);
        let a = room_session(7, 3);
        registry.add_room_session(room, a.clone());

        assert!(registry.remove_room_session(room, &a));
        assert!(!registry.remove_room_session(room, &a));
        assert_eq!(registry.counts(), RegistryCounts::default());
    }

    #[test]
    fn same_identity_may_hold_several_room_sessions() {
        let registry = ConnectionRegistry::new();
        let first = room_session(7, 3);
        let second = room_session(7, 3);
        registry.add_room_session(RoomId::new(3), first.clone());
        registry.add_room_session(RoomId::new(3), second);

        assert_eq!(registry.sessions_in_room(RoomId::new(3)).len(), 2);
        assert!(registry.remove(&first));
        assert!(registry.has_room_sessions(UserId::new(7)));
    }

    #[test]
    fn second_global_login_supersedes_first() {
        let registry = ConnectionRegistry::new();
        let first = global_session(7);
        let second = global_session(7);

        assert!(registry.set_global_session(first.clone()).is_none());
        let evicted = registry.set_global_session(second.clone()).unwrap();

        assert_eq!(evicted.id(), first.id());
        assert!(first.is_closed());
        assert_eq!(first.close_reason(), Some(CloseReason::Superseded));
        assert!(!second.is_closed());
        let installed = registry.global_sessions();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].id(), second.id());
    }

    #[test]
    fn reinstalling_same_global_session_does_not_close_it() {
        let registry = ConnectionRegistry::new();
        let session = global_session(7);
        let _ = registry.set_global_session(session.clone());
        assert!(registry.set_global_session(session.clone()).is_none());
        assert!(!session.is_closed());
    }

    #[test]
    fn superseded_teardown_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let first = global_session(7);
        let second = global_session(7);
        let _ = registry.set_global_session(first.clone());
        let _ = registry.set_global_session(second.clone());

        assert!(!registry.remove_global_session(&first));
        assert_eq!(registry.global_sessions()[0].id(), second.id());
        assert!(registry.remove_global_session(&second));
        assert!(registry.sessions_for(Scope::Global).is_empty());
    }

    #[test]
    fn sessions_for_resolves_scope() {
        let registry = ConnectionRegistry::new();
        registry.add_room_session(RoomId::new(3), room_session(7, 3));
        let _ = registry.set_global_session(global_session(7));
        let _ = registry.set_global_session(global_session(9));

        assert_eq!(registry.sessions_for(Scope::Room(RoomId::new(3))).len(), 1);
        assert_eq!(registry.sessions_for(Scope::Global).len(), 2);
        assert_eq!(
            registry.counts(),
            RegistryCounts {
                rooms: 1,
                room_sessions: 1,
                global_sessions: 2,
            }
        );
    }

    #[test]
    fn all_sessions_spans_both_maps() {
        let registry = ConnectionRegistry::new();
        registry.add_room_session(RoomId::new(3), room_session(7, 3));
        registry.add_room_session(RoomId::new(4), room_session(9, 4));
        let _ = registry.set_global_session(global_session(7));
        assert_eq!(registry.all_sessions().len(), 3);
    }

    #[test]
    fn has_room_sessions_ignores_global() {
        let registry = ConnectionRegistry::new();
        let _ = registry.set_global_session(global_session(7));
        assert!(!registry.has_room_sessions(UserId::new(7)));
    }
}
