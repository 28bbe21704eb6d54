use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Author of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize, ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// What the message carries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize, ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// A single row in the `messages` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub content: String,
    /// Only set when `kind` is [`MessageKind::Image`].
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A text message stamped with the current time.
    pub fn text(chat_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            role,
            kind: MessageKind::Text,
            content: content.into(),
            image_url: None,
            created_at: crate::entities::now(),
        }
    }

    /// An image message. The user side carries the prompt and no URL; the
    /// assistant side carries a caption and the generated image reference.
    pub fn image(
        chat_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
        image_url: Option<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Image,
            image_url,
            ..Self::text(chat_id, role, content)
        }
    }
}
