//! Chat history: list, inspect, rename.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::entities::{ChatStore, MessageStore};
use crate::error::ServerError;
use crate::schemas::chats::{ChatResponse, MessageResponse, UpdateChatRequest};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_chats, get_chat, update_chat, list_chat_messages),
    components(schemas(ChatResponse, MessageResponse, UpdateChatRequest))
)]
pub struct ChatsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chats", get(list_chats))
        .route("/chats/{id}", get(get_chat).patch(update_chat))
        .route("/chats/{id}/messages", get(list_chat_messages))
}

#[utoipa::path(
    get,
    path = "/chats",
    tag = "chats",
    responses(
        (status = 200, description = "Chats, most recently active first", body = [ChatResponse]),
        (status = 500, description = "Store error"),
    )
)]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ChatResponse>>, ServerError> {
    let chats = state.store.list_chats().await?;
    Ok(Json(chats.iter().map(|c| c.to_response()).collect()))
}

#[utoipa::path(
    get,
    path = "/chats/{id}",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "The chat", body = ChatResponse),
        (status = 404, description = "Unknown chat"),
    )
)]
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ChatResponse>, ServerError> {
    let chat = state
        .store
        .get_chat(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("chat {id} not found")))?;
    Ok(Json(chat.to_response()))
}

/// Set or clear the chat's title.
#[utoipa::path(
    patch,
    path = "/chats/{id}",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    request_body = UpdateChatRequest,
    responses(
        (status = 200, description = "Updated chat", body = ChatResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown chat"),
    )
)]
pub async fn update_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ServerError> {
    let Json(req) = payload?;
    let title = req
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if !state.store.update_chat_title(&id, title).await? {
        return Err(ServerError::NotFound(format!("chat {id} not found")));
    }
    let chat = state
        .store
        .get_chat(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("chat {id} not found")))?;
    Ok(Json(chat.to_response()))
}

#[utoipa::path(
    get,
    path = "/chats/{id}/messages",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Messages, oldest first", body = [MessageResponse]),
        (status = 404, description = "Unknown chat"),
    )
)]
pub async fn list_chat_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, ServerError> {
    if state.store.get_chat(&id).await?.is_none() {
        return Err(ServerError::NotFound(format!("chat {id} not found")));
    }
    let messages = state.store.list_messages(&id).await?;
    Ok(Json(messages.iter().map(|m| m.to_response()).collect()))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
