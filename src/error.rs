//! Failure taxonomy for one poll cycle.
//!
//! Every variant is recoverable: the poll loop records it, keeps the last good
//! snapshot on screen and retries on the next tick. Messages never carry
//! credential contents, only the classification and the HTTP status if any.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// Connection failure or timeout before a response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the token (HTTP 401/403) or it expired locally.
    #[error("session expired (HTTP {})", status.map_or_else(|| "-".to_string(), |s| s.to_string()))]
    Unauthorized { status: Option<u16> },

    /// HTTP 429.
    #[error("rate limited by server")]
    RateLimited,

    /// 2xx response whose body does not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Credential file absent, unreadable, or without an access token.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Any other non-2xx status.
    #[error("unexpected HTTP status {status}")]
    Unknown { status: u16 },
}

impl PollError {
    /// Errors the user fixes by logging in again with the CLI.
    pub fn needs_login(&self) -> bool {
        matches!(
            self,
            PollError::Unauthorized { .. } | PollError::MissingCredential(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            PollError::Unauthorized { status } => *status,
            PollError::RateLimited => Some(429),
            PollError::Unknown { status } => Some(*status),
            _ => None,
        }
    }

    /// Short identifier for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PollError::Network(_) => "network",
            PollError::Unauthorized { .. } => "unauthorized",
            PollError::RateLimited => "rate_limited",
            PollError::MalformedResponse(_) => "malformed_response",
            PollError::MissingCredential(_) => "missing_credential",
            PollError::Unknown { .. } => "unknown",
        }
    }
}
