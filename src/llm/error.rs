//! LLM error types with retry classification.
//!
//! Distinguishes between transient errors (retry with backoff) and permanent ones.

use std::time::Duration;

/// Error from a language model call.
#[derive(Debug, Clone)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    pub message: String,
    /// Suggested retry delay (from Retry-After header)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn of(kind: LlmErrorKind, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::of(LlmErrorKind::RateLimited, Some(429), message)
        }
    }

    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::of(LlmErrorKind::ServerError, Some(status_code), message)
    }

    pub fn client_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::of(LlmErrorKind::ClientError, Some(status_code), message)
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::of(LlmErrorKind::NetworkError, None, message)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::of(LlmErrorKind::ParseError, None, message)
    }

    /// Provider is not configured (e.g. missing credentials).
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::of(LlmErrorKind::Unavailable, None, message)
    }

    /// Build an error from an HTTP status, classifying it.
    pub fn from_status(status_code: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        match classify_http_status(status_code) {
            LlmErrorKind::RateLimited => Self::rate_limited(body, retry_after),
            LlmErrorKind::ClientError => Self::client_error(status_code, body),
            _ => Self::server_error(status_code, body),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Delay before retry `attempt` (0-based).
    ///
    /// Uses `retry_after` if set, otherwise exponential backoff from a per-kind
    /// base, capped at 60 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }

        let base_secs: u64 = match self.kind {
            LlmErrorKind::RateLimited => 5,
            LlmErrorKind::ServerError => 2,
            _ => 1,
        };

        let delay = base_secs.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_secs(delay.min(60))
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classification of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 - transient
    RateLimited,
    /// 5xx - transient
    ServerError,
    /// 4xx other than 429 - permanent
    ClientError,
    /// Connection failed or timed out - transient
    NetworkError,
    /// Response could not be decoded - permanent
    ParseError,
    /// Provider cannot serve requests at all
    Unavailable,
}

impl LlmErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LlmErrorKind::RateLimited => "Rate limited",
            LlmErrorKind::ServerError => "Server error",
            LlmErrorKind::ClientError => "Client error",
            LlmErrorKind::NetworkError => "Network error",
            LlmErrorKind::ParseError => "Parse error",
            LlmErrorKind::Unavailable => "Provider unavailable",
        };
        f.write_str(s)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Maximum total time to spend retrying
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

/// Parse HTTP status code into error kind.
fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}
