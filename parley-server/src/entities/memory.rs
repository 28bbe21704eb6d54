//! In-process store used by relay tests; can be told to fail specific writes.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::entities::{Chat, ChatStore, Message, MessageRole, MessageStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    chats: Mutex<Vec<Chat>>,
    messages: Mutex<Vec<Message>>,
    fail_chat_writes: AtomicBool,
    fail_user_writes: AtomicBool,
    fail_assistant_writes: AtomicBool,
}

fn injected(what: &str) -> sqlx::Error {
    sqlx::Error::Protocol(format!("injected failure: {what}"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_chat_writes(&self) {
        self.fail_chat_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_user_writes(&self) {
        self.fail_user_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_assistant_writes(&self) {
        self.fail_assistant_writes.store(true, Ordering::SeqCst);
    }

    pub fn chat_count(&self) -> usize {
        self.chats.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Snapshot of every stored message for `chat_id`, in storage order.
    pub fn messages_for(&self, chat_id: &str) -> Vec<Message> {
        self.messages
            .lock()
            .map(|m| m.iter().filter(|m| m.chat_id == chat_id).cloned().collect())
            .unwrap_or_default()
    }
}

impl ChatStore for MemoryStore {
    async fn create_chat(&self, chat: Chat) -> Result<(), sqlx::Error> {
        if self.fail_chat_writes.load(Ordering::SeqCst) {
            return Err(injected("create_chat"));
        }
        let mut chats = self.chats.lock().map_err(|_| injected("poisoned"))?;
        if chats.iter().any(|c| c.id == chat.id) {
            return Err(injected("duplicate chat id"));
        }
        chats.push(chat);
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>, sqlx::Error> {
        let chats = self.chats.lock().map_err(|_| injected("poisoned"))?;
        Ok(chats.iter().find(|c| c.id == id).cloned())
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, sqlx::Error> {
        let mut chats = self.chats.lock().map_err(|_| injected("poisoned"))?.clone();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn update_chat_title(&self, id: &str, title: Option<&str>) -> Result<bool, sqlx::Error> {
        let mut chats = self.chats.lock().map_err(|_| injected("poisoned"))?;
        match chats.iter_mut().find(|c| c.id == id) {
            Some(chat) => {
                chat.title = title.map(str::to_owned);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl MessageStore for MemoryStore {
    async fn append_message(&self, msg: Message) -> Result<(), sqlx::Error> {
        let failing = match msg.role {
            MessageRole::User => &self.fail_user_writes,
            MessageRole::Assistant => &self.fail_assistant_writes,
        };
        if failing.load(Ordering::SeqCst) {
            return Err(injected("append_message"));
        }
        {
            let mut chats = self.chats.lock().map_err(|_| injected("poisoned"))?;
            let chat = chats
                .iter_mut()
                .find(|c| c.id == msg.chat_id)
                .ok_or(sqlx::Error::RowNotFound)?;
            chat.updated_at = chat.updated_at.max(msg.created_at);
        }
        self.messages
            .lock()
            .map_err(|_| injected("poisoned"))?
            .push(msg);
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>, sqlx::Error> {
        let mut listed = self.messages_for(chat_id);
        // Stable sort keeps insertion order for equal timestamps.
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(listed)
    }
}
