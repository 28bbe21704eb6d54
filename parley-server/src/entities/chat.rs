use crate::entities::{AnyStore, dao::Chat, format_timestamp, parse_timestamp};
use std::future::Future;

type ChatRow = (String, Option<String>, String, String);

pub trait ChatStore: Send + Sync + 'static {
    fn create_chat(&self, chat: Chat) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    fn get_chat(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Chat>, sqlx::Error>> + Send;
    /// Most recently active first.
    fn list_chats(&self) -> impl Future<Output = Result<Vec<Chat>, sqlx::Error>> + Send;
    /// Returns `false` when no chat has the given id.
    fn update_chat_title(
        &self,
        id: &str,
        title: Option<&str>,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
}

fn chat_from_row((id, title, created_at, updated_at): ChatRow) -> Chat {
    Chat {
        id,
        title,
        created_at: parse_timestamp(&created_at, "created_at"),
        updated_at: parse_timestamp(&updated_at, "updated_at"),
    }
}

impl ChatStore for AnyStore {
    async fn create_chat(&self, chat: Chat) -> Result<(), sqlx::Error> {
        let created_at = format_timestamp(&chat.created_at);
        let updated_at = format_timestamp(&chat.updated_at);
        sqlx::query(
            "INSERT INTO chats (id, title, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&chat.id)
        .bind(&chat.title)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>, sqlx::Error> {
        let row: Option<ChatRow> = sqlx::query_as(
            "SELECT id, title, created_at, updated_at FROM chats WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(chat_from_row))
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, sqlx::Error> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT id, title, created_at, updated_at FROM chats ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(chat_from_row).collect())
    }

    async fn update_chat_title(&self, id: &str, title: Option<&str>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE chats SET title = ?1 WHERE id = ?2")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
