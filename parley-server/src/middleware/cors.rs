use axum::http::{HeaderName, HeaderValue};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::middleware::trace::X_TRACE_ID;
use crate::routes::chat::X_CHAT_ID;

/// Browsers may only read `x-chat-id` from the `/chat` response if it is
/// listed as exposed.
pub fn cors_layer(config: &Config) -> CorsLayer {
    let exposed = [
        HeaderName::from_static(X_CHAT_ID),
        HeaderName::from_static(X_TRACE_ID),
    ];
    let base = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers(exposed);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    if origins.is_empty() {
        // Wildcard – suitable for development; set PARLEY_CORS_ORIGINS in production.
        base.allow_origin(Any)
    } else {
        base.allow_origin(origins)
    }
}
