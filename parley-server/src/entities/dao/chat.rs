use chrono::{DateTime, Utc};

/// A row in the `chats` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: String,
    /// Mutable display title; absent until someone sets one.
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every message write for this chat.
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    /// A fresh chat with a generated id and no title.
    pub fn new() -> Self {
        let now = crate::entities::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}
