//! Outbound model provider.
//!
//! The relay only sees [`ModelProvider`]; the binary plugs in
//! [`openai::OpenAiProvider`] and tests plug in a scripted fake.

pub mod error;
pub mod openai;
#[cfg(test)]
pub mod scripted;
pub mod sse;

pub use error::{ErrorCategory, ProviderError};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::MessageRole;

/// Incremental text chunks from one streaming completion.
///
/// Ends after the provider's completion marker. Any `Err` item is terminal.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// One prior turn of the conversation, as sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// `https://…` or a `data:` URL.
    pub url: String,
    pub revised_prompt: Option<String>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync + 'static {
    /// Open a streaming completion over `messages` (oldest first).
    ///
    /// Errors that happen before the first byte of the body come back as
    /// `Err`; later ones arrive as items of the stream.
    async fn stream_chat(&self, messages: Vec<PromptMessage>) -> Result<ChunkStream, ProviderError>;

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, ProviderError>;
}
