//! Per-request tracing span with a propagated or generated `x-trace-id`.
//!
//! Small JSON bodies are logged at `debug`. Anything else, event streams in
//! particular, passes through untouched so streaming is never buffered.

use std::time::Instant;

use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

pub const X_TRACE_ID: &str = "x-trace-id";

/// Bodies larger than this are never buffered for logging.
const MAX_LOGGED_BODY: u64 = 1024;

pub async fn trace_middleware(req: Request, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let trace_header = HeaderValue::from_str(&trace_id.to_string()).ok();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        info!("→ request started");
        let (mut parts, body) = req.into_parts();
        let body = log_small_json("request", &parts.headers, body).await;
        if let Some(value) = &trace_header {
            parts.headers.insert(X_TRACE_ID, value.clone());
        }

        let response = next.run(Request::from_parts(parts, body)).await;

        let (mut parts, body) = response.into_parts();
        let body = log_small_json("response", &parts.headers, body).await;
        if let Some(value) = trace_header {
            parts.headers.insert(X_TRACE_ID, value);
        }

        info!(
            status = parts.status.as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response headers sent"
        );
        Response::from_parts(parts, body)
    }
    .instrument(span)
    .await
}

async fn log_small_json(direction: &'static str, headers: &HeaderMap, body: Body) -> Body {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    let small = body
        .size_hint()
        .exact()
        .is_some_and(|len| len <= MAX_LOGGED_BODY);
    if !is_json || !small {
        return body;
    }

    match body.collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            if let Ok(text) = std::str::from_utf8(&bytes) {
                debug!(direction, body = %text, "body");
            }
            Body::from(bytes)
        }
        Err(e) => {
            warn!(direction, error = %e, "failed to read body for logging");
            Body::empty()
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
