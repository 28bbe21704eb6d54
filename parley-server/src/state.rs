//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::entities::AnyStore;
use crate::provider::ModelProvider;
use crate::relay::{Relay, RelayOptions};

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Chats and messages.
    pub store: Arc<AnyStore>,
    /// Upstream model provider.
    pub provider: Arc<dyn ModelProvider>,
}

impl AppState {
    pub fn relay(&self) -> Relay<AnyStore> {
        Relay::new(
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            RelayOptions::from_config(&self.config),
        )
    }
}
