//! Route table: chat CRUD and the streaming poll over plain HTTP, plus the
//! per-conversation viewer socket.
//!
//! - `GET /health`
//! - `GET /api/chats`, `POST /api/chats`
//! - `GET /api/chats/streaming`
//! - `DELETE /api/chats/{id}` cancels any running generation first
//! - `GET /ws/{id}` upgrades to the viewer socket

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chatrelay_common::{ChatSummary, ConversationId};
use serde_json::{json, Value};

use crate::connection::handle_conversation;
use crate::error::ApiResult;
use crate::server::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chats", get(list_chats).post(create_chat))
        .route("/api/chats/streaming", get(streaming_chats))
        .route("/api/chats/{id}", delete(delete_chat))
        .route("/ws/{id}", get(conversation_socket))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<Vec<ChatSummary>>> {
    Ok(Json(state.store.list_chats().await?))
}

async fn create_chat(State(state): State<AppState>) -> ApiResult<Json<ChatSummary>> {
    let chat = state.store.create_chat().await?;
    tracing::info!(conversation = %chat.id, "chat created");
    Ok(Json(chat))
}

/// Ids of conversations with a generation in flight.
async fn streaming_chats(State(state): State<AppState>) -> Json<Vec<ConversationId>> {
    Json(state.sessions.active_session_ids())
}

async fn delete_chat(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Value>> {
    if state.sessions.cancel_stream(&id) {
        tracing::info!(conversation = %id, "cancelled generation of deleted chat");
    }
    state.store.delete_chat(&id).await?;
    tracing::info!(conversation = %id, "chat deleted");
    Ok(Json(json!({ "ok": true })))
}

async fn conversation_socket(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_conversation(socket, id, state))
}
