use crate::entities::dao::{Message, MessageKind, MessageRole};
use crate::entities::{AnyStore, format_timestamp, parse_timestamp};
use std::future::Future;
use std::str::FromStr;
use tracing::warn;

type MessageRow = (String, String, String, String, String, Option<String>, String);

pub trait MessageStore: Send + Sync + 'static {
    /// Insert a message and bump the owning chat's `updated_at`.
    fn append_message(&self, msg: Message) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    /// Messages of one chat, oldest first.
    fn list_messages(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, sqlx::Error>> + Send;
}

fn message_from_row(
    (id, chat_id, role, kind, content, image_url, created_at): MessageRow,
) -> Result<Message, sqlx::Error> {
    let role = MessageRole::from_str(&role).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let kind = MessageKind::from_str(&kind).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(Message {
        id,
        chat_id,
        role,
        kind,
        content,
        image_url,
        created_at: parse_timestamp(&created_at, "created_at"),
    })
}

impl MessageStore for AnyStore {
    async fn append_message(&self, msg: Message) -> Result<(), sqlx::Error> {
        let created_at = format_timestamp(&msg.created_at);
        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, kind, content, image_url, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&msg.id)
        .bind(&msg.chat_id)
        .bind(msg.role.to_string())
        .bind(msg.kind.to_string())
        .bind(&msg.content)
        .bind(&msg.image_url)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        // Not transactional: concurrent writers to one chat only agree on
        // created_at ordering. The message is stored once the INSERT lands.
        if let Err(e) =
            sqlx::query("UPDATE chats SET updated_at = ?1 WHERE id = ?2 AND updated_at < ?1")
                .bind(&created_at)
                .bind(&msg.chat_id)
                .execute(&self.pool)
                .await
        {
            warn!(chat_id = %msg.chat_id, message_id = %msg.id, error = %e, "failed to bump chat updated_at");
        }
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>, sqlx::Error> {
        // rowid breaks ties between messages written in the same microsecond.
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, role, kind, content, image_url, created_at \
             FROM messages WHERE chat_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
