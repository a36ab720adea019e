use std::{
    collections::{BTreeSet, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::event::{ConnectionId, RoomId};

/// Live membership of every room.
///
/// Edits are idempotent. Only the session directory calls `add`/`remove`, so a
/// room's set always mirrors the directory's view of who is in it.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, BTreeSet<ConnectionId>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the room's members. Safe to iterate while others join or leave.
    pub fn members_of(&self, room: &RoomId) -> BTreeSet<ConnectionId> {
        self.rooms().get(room).cloned().unwrap_or_default()
    }

    pub(crate) fn add(&self, room: &RoomId, conn: ConnectionId) {
        self.rooms().entry(room.clone()).or_default().insert(conn);
    }

    pub(crate) fn remove(&self, room: &RoomId, conn: ConnectionId) {
        let mut rooms = self.rooms();
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Rooms that currently have at least one member.
    pub fn active_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<_> = self.rooms().keys().cloned().collect();
        rooms.sort();
        rooms
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<RoomId, BTreeSet<ConnectionId>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_are_idempotent() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("finance");
        let a = ConnectionId::new();

        registry.add(&room, a);
        registry.add(&room, a);
        assert_eq!(registry.members_of(&room).len(), 1);

        registry.remove(&room, a);
        registry.remove(&room, a);
        assert!(registry.members_of(&room).is_empty());
    }

    #[test]
    fn removing_from_unknown_room_is_noop() {
        let registry = RoomRegistry::new();
        registry.remove(&RoomId::from("nowhere"), ConnectionId::new());
        assert!(registry.active_rooms().is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_edits() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("finance");
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        registry.add(&room, a);

        let snapshot = registry.members_of(&room);
        registry.add(&room, b);

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&a));
        assert_eq!(registry.members_of(&room).len(), 2);
    }

    #[test]
    fn empty_rooms_are_pruned() {
        let registry = RoomRegistry::new();
        let a = ConnectionId::new();
        registry.add(&RoomId::from("finance"), a);
        registry.add(&RoomId::from("crypto"), ConnectionId::new());
        registry.remove(&RoomId::from("finance"), a);

        assert_eq!(registry.active_rooms(), vec![RoomId::from("crypto")]);
    }
}
