use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by a completion backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("Provider error: {message}")]
    Provider { message: String, transient: bool },

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),
}

impl CompletionError {
    /// A transient transport failure.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            transient: true,
        }
    }

    /// A failure that will not go away on retry (auth, bad request).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            transient: false,
        }
    }
}
