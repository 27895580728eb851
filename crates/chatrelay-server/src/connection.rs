//! Viewer socket for one conversation: replay history, join any running
//! generation, then relay session events and viewer commands.

use axum::extract::ws::{Message, WebSocket};
use chatrelay_common::{ClientMessage, ConversationId, ServerMessage, SessionError};
use chatrelay_core::Viewer;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::server::AppState;

pub const CHAT_NOT_FOUND: &str = "Chat not found";
pub const ALREADY_GENERATING: &str = "A response is already being generated";
pub const INVALID_JSON: &str = "Invalid JSON";
const HISTORY_FAILED: &str = "Failed to load chat history";
const PROMPT_SAVE_FAILED: &str = "Failed to save message";

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Serve an upgraded socket until the viewer goes away.
pub async fn handle_conversation(socket: WebSocket, id: ConversationId, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    match state.store.conversation_exists(&id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(conversation = %id, "unknown chat");
            let _ = send_message(&mut sink, &ServerMessage::error(CHAT_NOT_FOUND)).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
        Err(e) => {
            tracing::error!(conversation = %id, error = %e, "chat lookup failed");
            let _ = send_message(&mut sink, &ServerMessage::error(HISTORY_FAILED)).await;
            return;
        }
    }

    tracing::info!(conversation = %id, "Client connected");

    // 1. History.
    let messages = match state.store.history(&id).await {
        Ok(history) => history.into_iter().map(|m| m.into_history()).collect(),
        Err(e) => {
            tracing::error!(conversation = %id, error = %e, "failed to load history");
            let _ = send_message(&mut sink, &ServerMessage::error(HISTORY_FAILED)).await;
            return;
        }
    };
    if send_message(&mut sink, &ServerMessage::History { messages })
        .await
        .is_err()
    {
        return;
    }

    // 2. Join a running generation, if any.
    let (viewer, mut rx) = Viewer::channel();
    if let Some(subscription) = state.sessions.subscribe(&id, &viewer) {
        if send_message(&mut sink, &subscription.catch_up()).await.is_err() {
            state.sessions.unsubscribe(&id, viewer.id());
            return;
        }
    }

    // 3. Relay until either side goes away.
    relay(&mut sink, &mut stream, &id, &viewer, &mut rx, &state).await;

    // 4. Cleanup.
    tracing::info!(conversation = %id, "Client disconnected");
    state.sessions.unsubscribe(&id, viewer.id());
}

async fn relay(
    sink: &mut WsSink,
    stream: &mut WsStream,
    id: &ConversationId,
    viewer: &Viewer,
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServerMessage>,
    state: &AppState,
) {
    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                if send_message(sink, &msg).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(text.as_str(), id, viewer, state).await {
                            if send_message(sink, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(conversation = %id, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Act on one viewer frame. Returns a reply for this viewer only.
async fn handle_client_text(
    text: &str,
    id: &ConversationId,
    viewer: &Viewer,
    state: &AppState,
) -> Option<ServerMessage> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Some(ServerMessage::error(INVALID_JSON)),
    };
    let msg = match serde_json::from_value::<ClientMessage>(value) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(conversation = %id, error = %e, "ignoring unrecognized frame");
            return None;
        }
    };

    match msg {
        ClientMessage::Cancel => {
            tracing::info!(conversation = %id, "Cancel requested");
            state.sessions.cancel_stream(id);
            None
        }
        ClientMessage::Prompt { text } => {
            tracing::info!(conversation = %id, len = text.len(), "Prompt received");
            if let Err(e) = state.store.record_prompt(id, &text).await {
                tracing::error!(conversation = %id, error = %e, "failed to save prompt");
                return Some(ServerMessage::error(PROMPT_SAVE_FAILED));
            }
            match state.sessions.start_stream_subscribed(id.clone(), text, viewer) {
                Ok(_) => None,
                Err(SessionError::AlreadyActive(_)) => Some(ServerMessage::error(ALREADY_GENERATING)),
            }
        }
    }
}

/// Send a ServerMessage as a JSON text frame.
async fn send_message(sink: &mut WsSink, msg: &ServerMessage) -> Result<(), axum::Error> {
    sink.send(Message::Text(msg.to_json().into())).await
}
