use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::provider::PromptMessage;
use crate::relay::RelayEvent;

/// Body of `POST /chat`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The new user message. Must not be blank.
    #[serde(default)]
    pub message: String,
    /// Earlier turns, oldest first, as the client remembers them.
    #[serde(default)]
    pub history: Vec<PromptMessage>,
    /// Continue this chat; a new one is created when absent.
    pub chat_id: Option<String>,
}

/// Payload of one `data:` frame on the `POST /chat` event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ChatStreamFrame {
    Content { content: String },
    Done { done: bool },
    Error { error: String },
}

impl From<RelayEvent> for ChatStreamFrame {
    fn from(event: RelayEvent) -> Self {
        match event {
            RelayEvent::Content(content) => ChatStreamFrame::Content { content },
            RelayEvent::Done => ChatStreamFrame::Done { done: true },
            RelayEvent::Failed(error) => ChatStreamFrame::Error { error },
        }
    }
}
