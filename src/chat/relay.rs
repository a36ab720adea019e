//! The chat relay: session state machine, moderation, persistence and fan-out.
//!
//! A session moves `Connected -> Joined(room) -> Connected` and is dropped on
//! disconnect. Each session's join/leave/message run one at a time behind its
//! gate; different sessions proceed concurrently. Membership edits go through
//! the [`SessionDirectory`], which keeps the [`RoomRegistry`] in step.
//!
//! A message is reviewed, persisted, and only then broadcast to a membership
//! snapshot taken after the write. Moderation failures fail open.

use std::{collections::BTreeSet, sync::Arc};

use tracing::{debug, info, warn};

use super::{
    directory::{Departure, Outbox, Session, SessionDirectory},
    event::{ClientEvent, ConnectionId, JoinRequest, RoomId, ServerEvent},
    moderation::{ModerationOracle, Verdict},
    random_alias,
    registry::RoomRegistry,
    store::{CommunityCatalog, MessageStore, NewMessage, StoredMessage},
    RelayError,
};
use crate::config::ChatConfig;

pub struct ChatRelay<O, S, C> {
    oracle: O,
    store: S,
    catalog: C,
    rooms: Arc<RoomRegistry>,
    directory: SessionDirectory,
    config: ChatConfig,
}

impl<O, S, C> ChatRelay<O, S, C>
where
    O: ModerationOracle,
    S: MessageStore,
    C: CommunityCatalog,
{
    pub fn new(oracle: O, store: S, catalog: C, config: ChatConfig) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        Self {
            oracle,
            store,
            catalog,
            directory: SessionDirectory::new(rooms.clone()),
            rooms,
            config,
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn members_of(&self, room: &RoomId) -> BTreeSet<ConnectionId> {
        self.rooms.members_of(room)
    }

    pub fn lookup(&self, conn: ConnectionId) -> Option<Session> {
        self.directory.lookup(conn)
    }

    pub fn session_count(&self) -> usize {
        self.directory.len()
    }

    /// Opens a session on a fresh connection id.
    pub fn connect(&self, outbox: Outbox) -> Result<ConnectionId, RelayError> {
        let conn = ConnectionId::new();
        self.register(conn, outbox)?;
        Ok(conn)
    }

    pub fn register(&self, conn: ConnectionId, outbox: Outbox) -> Result<Session, RelayError> {
        let session = self.directory.register(conn, outbox)?;
        info!(%conn, "client connected");
        Ok(session)
    }

    /// Runs one inbound event. Refusals are reported to the sender as `error`
    /// events; the returned error is only for the transport to decide whether
    /// to drop the connection.
    pub async fn handle(&self, conn: ConnectionId, event: ClientEvent) -> Result<(), RelayError> {
        let result = match event {
            ClientEvent::Join(request) => self.join(conn, request).await,
            ClientEvent::Leave => self.leave(conn).await,
            ClientEvent::Message(request) => self.send_message(conn, request.text).await.map(drop),
        };

        if let Err(err) = &result {
            self.report(conn, err);
        }
        result
    }

    /// Sends an `error` event to one connection.
    pub fn report(&self, conn: ConnectionId, err: &RelayError) {
        debug!(%conn, error = %err, "rejected client event");
        self.send_to(conn, ServerEvent::error(err.to_string()));
    }

    pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        self.directory.send(conn, event)
    }

    pub async fn join(&self, conn: ConnectionId, JoinRequest { username, room_id }: JoinRequest) -> Result<(), RelayError> {
        let gate = self.directory.gate(conn).ok_or(RelayError::UnknownSession(conn))?;
        let _turn = gate.lock().await;

        // Membership and broadcasts are keyed on the catalog's spelling of the room.
        let room_id = match self.catalog.resolve(&room_id).await.map_err(RelayError::CatalogUnavailable)? {
            Some(canonical) => canonical,
            None => return Err(RelayError::RoomNotFound(room_id)),
        };

        let username = match username.trim() {
            "" => random_alias(),
            name => name.to_owned(),
        };

        if let Some(previous) = self.directory.join(conn, &room_id, &username)? {
            self.announce_departure(previous);
        }

        info!(%conn, room = %room_id, %username, "joined room");
        self.broadcast(&room_id, &ServerEvent::UserJoined { username });
        Ok(())
    }

    pub async fn leave(&self, conn: ConnectionId) -> Result<(), RelayError> {
        let gate = self.directory.gate(conn).ok_or(RelayError::UnknownSession(conn))?;
        let _turn = gate.lock().await;

        let departure = self.directory.leave(conn).ok_or(RelayError::NotJoined)?;
        info!(%conn, room = %departure.room, "left room");
        self.announce_departure(departure);
        Ok(())
    }

    /// Reviews, persists and broadcasts one message from a joined session.
    pub async fn send_message(&self, conn: ConnectionId, text: String) -> Result<StoredMessage, RelayError> {
        let gate = self.directory.gate(conn).ok_or(RelayError::UnknownSession(conn))?;
        let _turn = gate.lock().await;

        let session = self.directory.lookup(conn).ok_or(RelayError::UnknownSession(conn))?;
        let (Some(room), Some(sender)) = (session.room, session.display_name) else {
            return Err(RelayError::NotJoined);
        };
        self.validate(&text)?;

        let verdict = self.moderate(&text).await;

        let stored = self.store
            .append(NewMessage { room: room.clone(), sender, content: text, verdict })
            .await
            .map_err(|err| {
                tracing::error!(%conn, %room, error = %err, "failed to persist message");
                RelayError::StoreUnavailable(err)
            })?;

        // Snapshot after the write so anyone who joined meanwhile still hears it.
        let members = self.rooms.members_of(&room);
        self.directory.send_all(&members, &ServerEvent::message(&stored));
        if stored.verdict.flagged {
            info!(%room, message_id = stored.id, "message flagged by moderation");
            self.directory.send_all(&members, &ServerEvent::flagged(&stored));
        }

        Ok(stored)
    }

    /// Drops the session. Remaining room members hear `user_left`; the
    /// departing connection hears nothing. Does not wait for an in-flight
    /// message from this session, which still completes.
    pub fn disconnect(&self, conn: ConnectionId) {
        if let Some(departure) = self.directory.unregister(conn) {
            self.announce_departure(departure);
        }
        info!(%conn, "client disconnected");
    }

    fn validate(&self, text: &str) -> Result<(), RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::Validation("Message must not be empty".to_owned()));
        }
        let max = self.config.max_message_len;
        if text.chars().count() > max {
            return Err(RelayError::Validation(format!("Message exceeds {max} characters")));
        }
        Ok(())
    }

    async fn moderate(&self, text: &str) -> Verdict {
        match tokio::time::timeout(self.config.moderation_timeout, self.oracle.review(text)).await {
            Ok(Ok(Verdict { flagged: true, reason })) => {
                Verdict::flagged(reason.unwrap_or_else(|| "Flagged by moderator".to_owned()))
            }
            Ok(Ok(_)) => Verdict::clean(),
            Ok(Err(err)) => {
                warn!(error = %err, "moderation unavailable, letting message through");
                Verdict::clean()
            }
            Err(_) => {
                warn!(timeout = ?self.config.moderation_timeout, "moderation timed out, letting message through");
                Verdict::clean()
            }
        }
    }

    fn announce_departure(&self, Departure { room, display_name }: Departure) {
        self.broadcast(&room, &ServerEvent::UserLeft { username: display_name });
    }

    fn broadcast(&self, room: &RoomId, event: &ServerEvent) {
        let members = self.rooms.members_of(room);
        let delivered = self.directory.send_all(&members, event);
        debug!(%room, delivered, "broadcast");
    }
}
