use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes::{chat, chats, health, images};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(info(
    title = "parley-server",
    description = "Streaming chat relay API",
    version = "0.1.0"
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root.merge(images::ImagesApi::openapi());
    root.merge(chats::ChatsApi::openapi());
    root
}

pub fn router() -> Router<Arc<AppState>> {
    let docs = Arc::new(get_docs());
    Router::new().route(
        "/api-docs/openapi.json",
        get(move || {
            let docs = Arc::clone(&docs);
            async move { Json(docs.as_ref().clone()) }
        }),
    )
}
