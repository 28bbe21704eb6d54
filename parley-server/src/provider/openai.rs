//! Client for OpenAI-compatible `/chat/completions` and `/images/generations`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sse::{SseEvent, decode_events};
use super::{ChunkStream, GeneratedImage, ModelProvider, PromptMessage, ProviderError};
use crate::config::ProviderConfig;

const DONE_MARKER: &str = "[DONE]";

#[derive(Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    image_model: String,
    image_size: String,
    system_prompt: Option<String>,
    image_timeout: Duration,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("image_model", &self.image_model)
            .finish_non_exhaustive()
    }
}

// ── Wire types ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a str>,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: Option<String>,
    b64_json: Option<String>,
    revised_prompt: Option<String>,
}

// ── Client ─────────────────────────────────────────────────────────────────────

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        // Connect timeout only; the relay enforces an idle timeout between chunks.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            chat_model: config.chat_model.clone(),
            image_model: config.image_model.clone(),
            image_size: config.image_size.clone(),
            system_prompt: config.system_prompt.clone(),
            image_timeout: config.image_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// The DALL-E models default to short-lived URLs only when asked; newer
    /// image models reject `response_format` and always answer inline.
    fn image_response_format(&self) -> Option<&'static str> {
        self.image_model.starts_with("dall-e").then_some("url")
    }
}

async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return ProviderError::from(e),
    };
    let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
        .ok()
        .and_then(|env| env.error)
        .and_then(|detail| detail.message)
        .unwrap_or(body);

    ProviderError::from_status(status, message, retry_after)
}

/// An `error` object delivered inside an otherwise successful stream.
fn in_stream_error(detail: ApiErrorDetail) -> ProviderError {
    let message = detail
        .message
        .unwrap_or_else(|| "provider reported an error mid-stream".to_owned());
    match detail.kind.as_deref() {
        Some("rate_limit_exceeded" | "rate_limit_error") => ProviderError::RateLimited {
            message,
            retry_after: None,
        },
        Some("server_error" | "overloaded_error") => ProviderError::Unavailable {
            status: 200,
            message,
        },
        _ => ProviderError::Api {
            status: 200,
            message,
        },
    }
}

enum Frame {
    Content(String),
    Nothing,
    Done,
}

fn interpret(event: &SseEvent) -> Result<Frame, ProviderError> {
    if event.data.trim() == DONE_MARKER {
        return Ok(Frame::Done);
    }
    if event.event.as_deref() == Some("error") {
        let detail = serde_json::from_str::<ApiErrorEnvelope>(&event.data)
            .ok()
            .and_then(|env| env.error)
            .unwrap_or(ApiErrorDetail {
                kind: None,
                message: Some(event.data.clone()),
            });
        return Err(in_stream_error(detail));
    }

    let chunk: CompletionChunk = serde_json::from_str(&event.data).map_err(|e| {
        ProviderError::MalformedStream(format!("undecodable chunk {:?}: {e}", event.data))
    })?;
    if let Some(detail) = chunk.error {
        return Err(in_stream_error(detail));
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    Ok(if text.is_empty() {
        Frame::Nothing
    } else {
        Frame::Content(text)
    })
}

/// Reduce decoded events to content chunks, ending at the `[DONE]` marker.
fn content_stream<S>(events: S) -> ChunkStream
where
    S: Stream<Item = Result<SseEvent, ProviderError>> + Send + 'static,
{
    let events = Box::pin(events);
    Box::pin(stream::unfold(Some(events), |state| async move {
        let mut events = state?;
        loop {
            match events.next().await {
                Some(Ok(event)) => match interpret(&event) {
                    Ok(Frame::Content(text)) => return Some((Ok(text), Some(events))),
                    Ok(Frame::Nothing) => continue,
                    Ok(Frame::Done) => return None,
                    Err(e) => return Some((Err(e), None)),
                },
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    return Some((
                        Err(ProviderError::MalformedStream(
                            "stream ended without a completion marker".into(),
                        )),
                        None,
                    ));
                }
            }
        }
    }))
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn stream_chat(&self, messages: Vec<PromptMessage>) -> Result<ChunkStream, ProviderError> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            wire.push(WireMessage {
                role: "system",
                content: prompt,
            });
        }
        wire.extend(messages.iter().map(|m| WireMessage {
            role: m.role.as_ref(),
            content: &m.content,
        }));

        let body = ChatCompletionRequest {
            model: &self.chat_model,
            messages: wire,
            stream: true,
        };
        debug!(model = %self.chat_model, messages = body.messages.len(), "opening completion stream");

        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(content_stream(decode_events(Box::pin(response.bytes_stream()))))
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        let body = ImageRequest {
            model: &self.image_model,
            prompt,
            n: 1,
            size: &self.image_size,
            response_format: self.image_response_format(),
        };
        debug!(model = %self.image_model, size = %self.image_size, "requesting image");

        let response = self
            .http
            .post(self.endpoint("images/generations"))
            .bearer_auth(&self.api_key)
            .timeout(self.image_timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: ImageResponse = response.json().await?;
        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("response contained no image".into()))?;

        let url = match (datum.url, datum.b64_json) {
            (Some(url), _) if !url.is_empty() => url,
            (_, Some(b64)) if !b64.is_empty() => format!("data:image/png;base64,{b64}"),
            _ => {
                return Err(ProviderError::InvalidResponse(
                    "image carried neither url nor b64_json".into(),
                ));
            }
        };

        Ok(GeneratedImage {
            url,
            revised_prompt: datum.revised_prompt,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
