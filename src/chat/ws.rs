use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::Relay;

use super::{directory::OUTBOX_CAPACITY, ClientEvent, ServerEvent};

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    State(relay): State<Arc<Relay>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

/// One task per socket: inbound frames are handled in arrival order, outbound
/// events are pumped from the session's outbox by a second task.
async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOX_CAPACITY);

    let conn = match relay.connect(tx) {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!(error = %err, "refusing socket");
            return;
        }
    };

    let mut outbound = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to serialize chat event");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut outbound => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = match ClientEvent::parse(text.as_str()) {
                        Ok(event) => event,
                        Err(err) => {
                            tracing::warn!(%conn, error = %err, "dropping frame");
                            relay.send_to(conn, ServerEvent::error(err.to_string()));
                            continue;
                        }
                    };

                    if let Err(err) = relay.handle(conn, event).await {
                        if err.is_fatal() {
                            tracing::error!(%conn, error = %err, "closing connection");
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    tracing::debug!(%conn, error = %err, "socket receive error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    relay.disconnect(conn);
    outbound.abort();
}
