//! `POST /generate-image`: single-shot image generation inside a chat.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::images::{GenerateImageRequest, GenerateImageResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(generate_image),
    components(schemas(GenerateImageRequest, GenerateImageResponse))
)]
pub struct ImagesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/generate-image", post(generate_image))
}

#[utoipa::path(
    post,
    path = "/generate-image",
    tag = "images",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Image generated", body = GenerateImageResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown chatId"),
        (status = 429, description = "Provider rate limit"),
        (status = 502, description = "Provider unreachable or failed"),
        (status = 503, description = "Provider unavailable"),
        (status = 504, description = "Provider timed out"),
    )
)]
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResponse>, ServerError> {
    let Json(req) = payload?;
    let image = state
        .relay()
        .generate_image(&req.prompt, &req.chat_id)
        .await?;
    Ok(Json(GenerateImageResponse {
        image_url: image.url,
        revised_prompt: image.revised_prompt,
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
