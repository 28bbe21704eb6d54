//! Server configuration, loaded from environment variables at startup.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no provider API key: set PARLEY_PROVIDER_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,
}

/// Runtime configuration for parley-server.
///
/// Every field except the provider key has a default, so a bare
/// `OPENAI_API_KEY=… parley-server` is a working setup.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// sqlx connection URL (default: `"sqlite://parley.db?mode=rwc"`).
    pub database_url: String,

    pub database_max_connections: u32,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    /// `RUST_LOG` wins when set.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for daily-rotated log files; stdout only when unset.
    pub log_dir: Option<String>,

    /// Comma-separated list of allowed CORS origins; any origin when unset.
    pub cors_allowed_origins: Option<String>,

    /// Serve `/api-docs/openapi.json`.
    pub enable_api_docs: bool,

    pub provider: ProviderConfig,

    /// Longest gap allowed between two upstream chunks.
    pub stream_idle_timeout: Duration,

    /// Capacity of the channel between the upstream reader and the response body.
    pub stream_buffer: usize,

    /// Upper bound on the size of one submitted message, in bytes.
    pub max_message_bytes: usize,
}

/// Settings for the OpenAI-compatible upstream.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Base URL without a trailing slash, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub image_model: String,
    pub image_size: String,
    /// Prepended to every chat completion as a `system` message.
    pub system_prompt: Option<String>,
    pub connect_timeout: Duration,
    /// Whole-request deadline for image generation. Chat streams have none.
    pub image_timeout: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("chat_model", &self.chat_model)
            .field("image_model", &self.image_model)
            .field("image_size", &self.image_size)
            .field("system_prompt", &self.system_prompt)
            .field("connect_timeout", &self.connect_timeout)
            .field("image_timeout", &self.image_timeout)
            .finish()
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_key = env
            .get("PARLEY_PROVIDER_API_KEY")
            .or_else(|| env.get("OPENAI_API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            bind_address: env.or("PARLEY_BIND", "0.0.0.0:3000"),
            database_url: env.or("PARLEY_DATABASE_URL", "sqlite://parley.db?mode=rwc"),
            database_max_connections: env.parse("PARLEY_DATABASE_MAX_CONNECTIONS", 5),
            log_level: env.or("PARLEY_LOG", "info"),
            log_json: env.flag("PARLEY_LOG_JSON", false),
            log_dir: env.get("PARLEY_LOG_DIR"),
            cors_allowed_origins: env.get("PARLEY_CORS_ORIGINS"),
            enable_api_docs: env.flag("PARLEY_ENABLE_API_DOCS", true),
            provider: ProviderConfig {
                base_url: env
                    .or("PARLEY_PROVIDER_BASE_URL", "https://api.openai.com/v1")
                    .trim_end_matches('/')
                    .to_owned(),
                api_key,
                chat_model: env.or("PARLEY_CHAT_MODEL", "gpt-4o-mini"),
                image_model: env.or("PARLEY_IMAGE_MODEL", "dall-e-3"),
                image_size: env.or("PARLEY_IMAGE_SIZE", "1024x1024"),
                system_prompt: env.get("PARLEY_SYSTEM_PROMPT"),
                connect_timeout: Duration::from_secs(env.parse("PARLEY_CONNECT_TIMEOUT_SECS", 10)),
                image_timeout: Duration::from_secs(env.parse("PARLEY_IMAGE_TIMEOUT_SECS", 120)),
            },
            stream_idle_timeout: Duration::from_secs(
                env.parse("PARLEY_STREAM_IDLE_TIMEOUT_SECS", 45),
            ),
            stream_buffer: env.parse::<usize>("PARLEY_STREAM_BUFFER", 32).max(1),
            max_message_bytes: env.parse("PARLEY_MAX_MESSAGE_BYTES", 128 * 1024),
        })
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Set and non-blank.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
