//! WebSocket endpoint and event relay.
//!
//! Each connection runs a read loop plus a writer task fed by an unbounded
//! channel; the channel sender is what the presence registry hands out for
//! targeted delivery. A connection is anonymous until its `join` event and
//! may only send conversation events once identified.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{AppState, MessageKind};
use crate::store::{NewMessage, Store};

use super::events::{ClientEvent, MessagePayload, ServerEvent};
use super::presence::{EventSender, PresenceRegistry};

/// Per-connection relay state: anonymous until `join`, then identified.
pub struct ConnState {
    pub session_id: Uuid,
    pub user_id: Option<Uuid>,
}

impl ConnState {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: None,
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer task: serialize server events onto the socket.
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("event serialize error: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnState::new();

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else { continue };
        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                // Malformed payloads are dropped; the connection stays open.
                tracing::warn!(session_id = %conn.session_id, "dropping malformed event: {e}");
                continue;
            }
        };
        handle_event(&state.store, &state.presence, &mut conn, &tx, event).await;
    }

    // A stale disconnect (session already replaced by a newer join) is a no-op.
    state.presence.remove_by_session(conn.session_id);
}

/// Dispatch one inbound event. Separated from the socket plumbing so relay
/// semantics are testable without a live websocket.
pub async fn handle_event(
    store: &Arc<dyn Store>,
    registry: &Arc<PresenceRegistry>,
    conn: &mut ConnState,
    tx: &EventSender,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Join { user_id } => {
            // A connection re-identifying as a different user releases its
            // previous entry; otherwise that entry would outlive the
            // connection's disconnect cleanup.
            if let Some(prev) = conn.user_id {
                if prev != user_id {
                    registry.release_identity(prev, conn.session_id);
                }
            }
            conn.user_id = Some(user_id);
            registry.set_presence(user_id, conn.session_id, tx.clone());
        }

        ClientEvent::PeerRegister { user_id, peer_id } => {
            registry.set_peer_id(user_id, peer_id);
        }

        ClientEvent::MessageSend {
            conversation_id,
            sender_id,
            text,
            attachment_url,
            kind,
        } => {
            if conn.user_id.is_none() {
                tracing::warn!(session_id = %conn.session_id, "message:send before join, dropped");
                return;
            }
            if let Err(e) = relay_send(
                store,
                registry,
                conversation_id,
                sender_id,
                text,
                attachment_url,
                kind,
            )
            .await
            {
                tracing::error!(%conversation_id, "message:send failed: {e}");
            }
        }

        ClientEvent::MessageRead {
            conversation_id,
            user_id,
        } => {
            if conn.user_id.is_none() {
                tracing::warn!(session_id = %conn.session_id, "message:read before join, dropped");
                return;
            }
            if let Err(e) = relay_read(store, registry, conversation_id, user_id).await {
                tracing::error!(%conversation_id, "message:read failed: {e}");
            }
        }

        // Broad fan-out by design; clients filter by intended recipient.
        ClientEvent::CallOffer(payload) => {
            registry.broadcast_except(Some(conn.session_id), &ServerEvent::CallOffer(payload));
        }
        ClientEvent::CallAnswer(payload) => {
            registry.broadcast_except(Some(conn.session_id), &ServerEvent::CallAnswer(payload));
        }
    }
}

/// Persist a message, refresh the conversation summary and fan the record
/// out to every participant with an active session.
async fn relay_send(
    store: &Arc<dyn Store>,
    registry: &Arc<PresenceRegistry>,
    conversation_id: Uuid,
    sender_id: Uuid,
    text: Option<String>,
    attachment_url: Option<String>,
    kind: Option<MessageKind>,
) -> Result<(), crate::store::StoreError> {
    let kind = kind.unwrap_or(MessageKind::Text);
    let text = text.filter(|t| !t.is_empty());
    if text.is_none() && attachment_url.is_none() {
        tracing::warn!(%conversation_id, "message:send without text or attachment, dropped");
        return Ok(());
    }

    // Summary: the literal text when present, otherwise a kind label.
    let summary = match &text {
        Some(t) => t.clone(),
        None => kind.summary_label().to_string(),
    };

    let message = store
        .create_message(NewMessage {
            conversation_id,
            sender_id,
            text,
            attachment_url,
            kind,
        })
        .await?;

    store.touch_conversation(conversation_id, &summary).await?;

    let sender = store.user_brief(sender_id).await?;
    let participants = store.conversation_participants(conversation_id).await?;

    let payload = ServerEvent::MessageNew(MessagePayload { message, sender });
    // Presence is resolved after the awaited writes on purpose: connections
    // may have come or gone while they were pending.
    for participant in participants {
        registry.send_to(participant, payload.clone());
    }
    Ok(())
}

/// Mark every message in the conversation read by `reader_id` (idempotent)
/// and notify present participants.
async fn relay_read(
    store: &Arc<dyn Store>,
    registry: &Arc<PresenceRegistry>,
    conversation_id: Uuid,
    reader_id: Uuid,
) -> Result<(), crate::store::StoreError> {
    store.append_read_by(conversation_id, reader_id).await?;

    let participants = store.conversation_participants(conversation_id).await?;
    let update = ServerEvent::MessageReadUpdate {
        conversation_id,
        user_id: reader_id,
    };
    for participant in participants {
        registry.send_to(participant, update.clone());
    }
    Ok(())
}
