//! `POST /chat`: stream one assistant reply as server-sent events.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::provider::PromptMessage;
use crate::relay::TurnRequest;
use crate::schemas::chat::{ChatRequest, ChatStreamFrame};
use crate::state::AppState;

/// Carries the id of the chat the turn was written to.
pub const X_CHAT_ID: &str = "x-chat-id";

#[derive(OpenApi)]
#[openapi(
    paths(chat),
    components(schemas(ChatRequest, ChatStreamFrame, PromptMessage))
)]
pub struct ChatApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

/// Send a message and stream the reply.
///
/// The chat id is in the `x-chat-id` header, available before the first
/// frame. Each frame is `data: {"content": "…"}`; the stream ends with
/// either `data: {"done": true}` or `data: {"error": "…"}`.
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Reply stream", content_type = "text/event-stream", body = ChatStreamFrame,
            headers(("x-chat-id" = String, description = "Chat the turn belongs to"))),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown chatId"),
        (status = 500, description = "Store error"),
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let Json(req) = payload?;
    debug!(
        message_len = req.message.len(),
        history = req.history.len(),
        chat_id = ?req.chat_id,
        "chat request"
    );

    let turn = state
        .relay()
        .submit_turn(TurnRequest {
            history: req.history,
            message: req.message,
            chat_id: req.chat_id,
        })
        .await?;

    let chat_id = HeaderValue::from_str(&turn.chat_id)
        .map_err(|e| ServerError::Internal(format!("chat id is not a valid header: {e}")))?;

    // The turn task is detached: it finishes and persists even if the
    // response body is dropped.
    let events = turn
        .events
        .map(|event| Event::default().json_data(ChatStreamFrame::from(event)));

    let mut response = Sse::new(events).into_response();
    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static(X_CHAT_ID), chat_id);
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    Ok(response)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
