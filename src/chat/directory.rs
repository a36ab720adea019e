use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::{
    event::{ConnectionId, RoomId, ServerEvent},
    registry::RoomRegistry,
    RelayError,
};

/// Events a connection may have queued before further ones are dropped.
pub const OUTBOX_CAPACITY: usize = 64;

pub type Outbox = mpsc::Sender<ServerEvent>;

/// What the rest of the relay may know about a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub conn: ConnectionId,
    pub display_name: Option<String>,
    pub room: Option<RoomId>,
}

/// A session leaving a room: who left and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room: RoomId,
    pub display_name: String,
}

struct Entry {
    session: Session,
    outbox: Outbox,
    gate: Arc<tokio::sync::Mutex<()>>,
}

/// Connection -> session map.
///
/// All membership edits go through here while the session map is locked, and
/// the room registry is only touched under that lock, so "S is in R" reads the
/// same from both sides.
pub struct SessionDirectory {
    sessions: Mutex<HashMap<ConnectionId, Entry>>,
    rooms: Arc<RoomRegistry>,
}

impl SessionDirectory {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            rooms,
        }
    }

    pub fn register(&self, conn: ConnectionId, outbox: Outbox) -> Result<Session, RelayError> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&conn) {
            return Err(RelayError::DuplicateSession(conn));
        }

        let session = Session { conn, display_name: None, room: None };
        sessions.insert(conn, Entry {
            session: session.clone(),
            outbox,
            gate: Arc::default(),
        });
        Ok(session)
    }

    /// Moves the session into `room`. Returns where it was before, if anywhere
    /// else. The caller has already checked that `room` exists.
    pub fn join(
        &self,
        conn: ConnectionId,
        room: &RoomId,
        display_name: &str,
    ) -> Result<Option<Departure>, RelayError> {
        let mut sessions = self.sessions();
        let entry = sessions.get_mut(&conn).ok_or(RelayError::UnknownSession(conn))?;

        let previous = match entry.session.room.take() {
            Some(old) if &old == room => None,
            Some(old) => {
                self.rooms.remove(&old, conn);
                Some(Departure {
                    room: old,
                    display_name: entry.session.display_name.clone().unwrap_or_default(),
                })
            }
            None => None,
        };

        entry.session.room = Some(room.clone());
        entry.session.display_name = Some(display_name.to_owned());
        self.rooms.add(room, conn);

        Ok(previous)
    }

    pub fn leave(&self, conn: ConnectionId) -> Option<Departure> {
        let mut sessions = self.sessions();
        let entry = sessions.get_mut(&conn)?;
        self.vacate(conn, &mut entry.session)
    }

    pub fn unregister(&self, conn: ConnectionId) -> Option<Departure> {
        let mut sessions = self.sessions();
        let mut entry = sessions.remove(&conn)?;
        self.vacate(conn, &mut entry.session)
    }

    pub fn lookup(&self, conn: ConnectionId) -> Option<Session> {
        self.sessions().get(&conn).map(|entry| entry.session.clone())
    }

    /// Per-session operation lock. Holding it serializes that session's events.
    pub(crate) fn gate(&self, conn: ConnectionId) -> Option<Arc<tokio::sync::Mutex<()>>> {
        self.sessions().get(&conn).map(|entry| entry.gate.clone())
    }

    /// Queues `event` for one connection. Gone, closed or full connections are skipped.
    pub fn send(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let outbox = self.sessions().get(&conn).map(|entry| entry.outbox.clone());
        outbox.is_some_and(|outbox| deliver(conn, &outbox, event))
    }

    /// Queues `event` for every listed connection still registered. Returns how
    /// many accepted it. Never waits on a slow reader.
    pub fn send_all(&self, targets: &BTreeSet<ConnectionId>, event: &ServerEvent) -> usize {
        let outboxes: Vec<(ConnectionId, Outbox)> = {
            let sessions = self.sessions();
            targets
                .iter()
                .filter_map(|conn| sessions.get(conn).map(|entry| (*conn, entry.outbox.clone())))
                .collect()
        };

        outboxes
            .into_iter()
            .filter(|(conn, outbox)| deliver(*conn, outbox, event.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn vacate(&self, conn: ConnectionId, session: &mut Session) -> Option<Departure> {
        let room = session.room.take()?;
        self.rooms.remove(&room, conn);
        Some(Departure {
            room,
            display_name: session.display_name.clone().unwrap_or_default(),
        })
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<ConnectionId, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks both directions of the session <-> room mapping.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let sessions = self.sessions();
        let forward = sessions.values().all(|entry| match &entry.session.room {
            Some(room) => self.rooms.members_of(room).contains(&entry.session.conn),
            None => true,
        });
        let backward = self.rooms.active_rooms().iter().all(|room| {
            self.rooms.members_of(room).iter().all(|conn| {
                sessions.get(conn).and_then(|entry| entry.session.room.as_ref()) == Some(room)
            })
        });
        forward && backward
    }
}

fn deliver(conn: ConnectionId, outbox: &Outbox, event: ServerEvent) -> bool {
    match outbox.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(%conn, "outbox full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> (SessionDirectory, Arc<RoomRegistry>) {
        let rooms = Arc::new(RoomRegistry::new());
        (SessionDirectory::new(rooms.clone()), rooms)
    }

    fn register(directory: &SessionDirectory) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        register_with(directory, OUTBOX_CAPACITY)
    }

    fn register_with(directory: &SessionDirectory, capacity: usize) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::channel(capacity);
        directory.register(conn, tx).unwrap();
        (conn, rx)
    }

    #[test]
    fn duplicate_register_fails() {
        let (directory, _) = directory();
        let conn = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(OUTBOX_CAPACITY);
        directory.register(conn, tx.clone()).unwrap();

        assert!(matches!(
            directory.register(conn, tx),
            Err(RelayError::DuplicateSession(c)) if c == conn
        ));
    }

    #[test]
    fn fresh_session_is_unjoined() {
        let (directory, _) = directory();
        let (conn, _rx) = register(&directory);

        let session = directory.lookup(conn).unwrap();
        assert_eq!(session.room, None);
        assert_eq!(session.display_name, None);
    }

    #[test]
    fn join_moves_between_rooms() {
        let (directory, rooms) = directory();
        let (conn, _rx) = register(&directory);
        let finance = RoomId::from("finance");
        let crypto = RoomId::from("crypto");

        assert_eq!(directory.join(conn, &finance, "ana").unwrap(), None);
        let previous = directory.join(conn, &crypto, "ana").unwrap();

        assert_eq!(previous, Some(Departure { room: finance.clone(), display_name: "ana".into() }));
        assert!(rooms.members_of(&finance).is_empty());
        assert!(rooms.members_of(&crypto).contains(&conn));
        assert!(directory.is_consistent());
    }

    #[test]
    fn rejoining_same_room_reports_no_departure() {
        let (directory, rooms) = directory();
        let (conn, _rx) = register(&directory);
        let finance = RoomId::from("finance");

        directory.join(conn, &finance, "ana").unwrap();
        assert_eq!(directory.join(conn, &finance, "ana").unwrap(), None);
        assert_eq!(rooms.members_of(&finance).len(), 1);
    }

    #[test]
    fn join_unknown_connection_fails() {
        let (directory, rooms) = directory();
        let ghost = ConnectionId::new();
        assert!(matches!(
            directory.join(ghost, &RoomId::from("finance"), "ana"),
            Err(RelayError::UnknownSession(_))
        ));
        assert!(rooms.active_rooms().is_empty());
    }

    #[test]
    fn leave_returns_room_once() {
        let (directory, rooms) = directory();
        let (conn, _rx) = register(&directory);
        let finance = RoomId::from("finance");
        directory.join(conn, &finance, "ana").unwrap();

        assert_eq!(directory.leave(conn).map(|d| d.room), Some(finance.clone()));
        assert_eq!(directory.leave(conn), None);
        assert!(rooms.members_of(&finance).is_empty());
        assert!(directory.lookup(conn).is_some());
    }

    #[test]
    fn unregister_drops_record_and_membership() {
        let (directory, rooms) = directory();
        let (conn, _rx) = register(&directory);
        let (never_joined, _rx2) = register(&directory);
        let finance = RoomId::from("finance");
        directory.join(conn, &finance, "ana").unwrap();

        assert_eq!(directory.unregister(conn).map(|d| d.display_name), Some("ana".into()));
        assert_eq!(directory.unregister(never_joined), None);
        assert!(directory.is_empty());
        assert!(rooms.members_of(&finance).is_empty());
        assert!(directory.is_consistent());
    }

    #[test]
    fn send_all_skips_departed() {
        let (directory, rooms) = directory();
        let (a, mut rx_a) = register(&directory);
        let (b, mut rx_b) = register(&directory);
        let finance = RoomId::from("finance");
        directory.join(a, &finance, "ana").unwrap();
        directory.join(b, &finance, "bo").unwrap();

        let snapshot = rooms.members_of(&finance);
        directory.unregister(b);

        let event = ServerEvent::UserLeft { username: "bo".into() };
        assert_eq!(directory.send_all(&snapshot, &event), 1);
        assert_eq!(rx_a.try_recv().unwrap(), event);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn stalled_reader_is_capped_without_affecting_others() {
        let (directory, rooms) = directory();
        let (stalled, mut rx_stalled) = register_with(&directory, 2);
        let (live, mut rx_live) = register_with(&directory, 8);
        let finance = RoomId::from("finance");
        directory.join(stalled, &finance, "ana").unwrap();
        directory.join(live, &finance, "bo").unwrap();

        let members = rooms.members_of(&finance);
        let delivered: Vec<usize> = (0..5)
            .map(|i| directory.send_all(&members, &ServerEvent::error(format!("event {i}"))))
            .collect();

        assert_eq!(delivered, [2, 2, 1, 1, 1]);
        assert!(!directory.send(stalled, ServerEvent::error("one more")));

        let mut queued = Vec::new();
        while let Ok(event) = rx_stalled.try_recv() {
            queued.push(event);
        }
        assert_eq!(queued, [ServerEvent::error("event 0"), ServerEvent::error("event 1")]);

        for i in 0..5 {
            assert_eq!(rx_live.try_recv().unwrap(), ServerEvent::error(format!("event {i}")));
        }

        // Once drained, the stalled reader receives again.
        assert!(directory.send(stalled, ServerEvent::error("caught up")));
        assert_eq!(rx_stalled.try_recv().unwrap(), ServerEvent::error("caught up"));
    }

    #[test]
    fn concurrent_membership_churn_stays_consistent() {
        let (directory, _) = directory();
        let directory = Arc::new(directory);
        let rooms = ["finance", "crypto", "rates"].map(RoomId::from);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let directory = directory.clone();
                let rooms = rooms.clone();
                std::thread::spawn(move || {
                    let (conn, _rx) = register(&directory);
                    for step in 0..200 {
                        match (i + step) % 4 {
                            0 | 1 => {
                                directory.join(conn, &rooms[(i + step) % 3], "x").unwrap();
                            }
                            2 => {
                                directory.leave(conn);
                            }
                            _ => assert!(directory.is_consistent()),
                        }
                    }
                    directory.unregister(conn);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(directory.is_consistent());
        assert!(directory.is_empty());
    }
}
