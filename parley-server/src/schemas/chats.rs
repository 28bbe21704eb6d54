use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::{Chat, Message, MessageKind, MessageRole};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: String,
}

/// Body of `PATCH /chats/{id}`. A `null` or missing title clears it.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateChatRequest {
    #[serde(default)]
    pub title: Option<String>,
}

impl Chat {
    pub fn to_response(&self) -> ChatResponse {
        ChatResponse {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

impl Message {
    pub fn to_response(&self) -> MessageResponse {
        MessageResponse {
            id: self.id.clone(),
            chat_id: self.chat_id.clone(),
            role: self.role,
            kind: self.kind,
            content: self.content.clone(),
            image_url: self.image_url.clone(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}
