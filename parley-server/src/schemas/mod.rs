//! JSON request/response bodies of the HTTP surface.

pub mod chat;
pub mod chats;
pub mod images;
