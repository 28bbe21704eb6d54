use strum::{AsRefStr, Display};
use thiserror::Error;

/// Errors returned by a [`super::ModelProvider`].
///
/// Variants carry enough detail for the server log. What the end user sees
/// comes from [`ProviderError::category`] instead.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider answered with a 5xx or reported itself overloaded.
    #[error("provider unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The provider rejected our credentials (401/403).
    #[error("provider rejected credentials (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    /// The provider is throttling us (429).
    #[error("rate limited by provider: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    /// Connecting or reading from the provider failed.
    #[error("network error talking to provider: {0}")]
    Network(String),

    /// A request or the gap between two stream chunks took too long.
    #[error("provider timed out: {0}")]
    Timeout(String),

    /// Any other non-2xx answer.
    #[error("provider API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The event stream broke its framing or ended before its completion marker.
    #[error("malformed provider stream: {0}")]
    MalformedStream(String),

    /// A single-shot response could not be understood.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// The small set of failure classes surfaced to end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    ServiceUnavailable,
    Network,
    Timeout,
    RateLimited,
    Unknown,
}

impl ErrorCategory {
    /// Text that is safe to show to the person chatting.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::ServiceUnavailable => {
                "The AI service is temporarily unavailable. Please try again later."
            }
            ErrorCategory::Network => {
                "Could not reach the AI service. Please check your connection and try again."
            }
            ErrorCategory::Timeout => "The AI service took too long to respond. Please try again.",
            ErrorCategory::RateLimited => {
                "Too many requests right now. Please wait a moment and try again."
            }
            ErrorCategory::Unknown => "Something went wrong while generating a response.",
        }
    }
}

impl ProviderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Unavailable { .. } | ProviderError::Authentication { .. } => {
                ErrorCategory::ServiceUnavailable
            }
            ProviderError::RateLimited { .. } => ErrorCategory::RateLimited,
            ProviderError::Network(_) => ErrorCategory::Network,
            ProviderError::Timeout(_) => ErrorCategory::Timeout,
            ProviderError::Api { .. }
            | ProviderError::MalformedStream(_)
            | ProviderError::InvalidResponse(_) => ErrorCategory::Unknown,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.category().user_message()
    }

    /// Map a non-2xx HTTP answer onto the taxonomy.
    pub fn from_status(status: u16, message: String, retry_after: Option<u64>) -> Self {
        match status {
            401 | 403 => ProviderError::Authentication { status, message },
            408 | 504 => ProviderError::Timeout(message),
            429 => ProviderError::RateLimited {
                message,
                retry_after,
            },
            500..=503 | 529 => ProviderError::Unavailable { status, message },
            _ => ProviderError::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            // Connect failures, resets and body read errors alike.
            ProviderError::Network(e.to_string())
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
