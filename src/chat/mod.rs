mod directory;
mod event;
mod moderation;
mod registry;
mod relay;
mod store;
mod ws;

use axum::{routing::get, Router};
use rand::seq::IndexedRandom;

use crate::AppState;

pub use directory::{Departure, Outbox, Session, SessionDirectory, OUTBOX_CAPACITY};
pub use event::{
    ClientEvent, ConnectionId, FlaggedPayload, FrameError, JoinRequest, MessagePayload, MessageRequest,
    RoomId, ServerEvent,
};
pub use moderation::{LlmModerator, ModerationError, ModerationOracle, Verdict};
pub use registry::RoomRegistry;
pub use relay::ChatRelay;
pub use store::{CommunityCatalog, MessageStore, NewMessage, StoreError, StoredMessage};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
}

/// Everything the relay can refuse. Display strings go to clients verbatim.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Community not found")]
    RoomNotFound(RoomId),

    #[error("User not found")]
    NotJoined,

    #[error("{0}")]
    Validation(String),

    #[error("Failed to save message")]
    StoreUnavailable(#[source] StoreError),

    #[error("Community lookup failed")]
    CatalogUnavailable(#[source] StoreError),

    #[error("connection {0} is already registered")]
    DuplicateSession(ConnectionId),

    #[error("connection {0} is not registered")]
    UnknownSession(ConnectionId),
}

impl RelayError {
    /// Fatal errors end the offending connection; everything else is reported
    /// to the client and the connection carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::DuplicateSession(_) | RelayError::UnknownSession(_))
    }
}

/// Display name for users who join without one.
pub(crate) fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Bullish",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Bearish", "Lucky",
    ];
    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Bull", "Trader", "Phoenix", "Griffin",
        "Investor", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    let mut rng = rand::rng();
    match (adjectives.choose(&mut rng), nouns.choose(&mut rng)) {
        (Some(adjective), Some(noun)) => format!("{adjective} {noun}"),
        _ => "Anonymous".to_owned(),
    }
}
