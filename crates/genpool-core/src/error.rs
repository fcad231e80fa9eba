//! Error types for genpool.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A required identity field is missing. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Login or browser automation failed before session cookies were harvested.
    #[error("Bootstrap failed: {0}")]
    BootstrapFailed(String),

    /// The harvested session lacks a required cookie or decodable token.
    #[error("Session incomplete: {0}")]
    SessionIncomplete(String),

    /// The service rejected the session (401-class).
    #[error("Authentication expired (status {status}): {body}")]
    AuthExpired { status: u16, body: String },

    /// The account ran out of balance (402-class).
    #[error("Quota exhausted (status {status}), suspended until {suspended_until}")]
    QuotaExhausted { status: u16, suspended_until: i64 },

    /// Any other non-2xx response. The worker survives.
    #[error("Upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// An in-page fetch produced no data.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The worker was evicted; the caller must request a new one.
    #[error("Worker destroyed: {0}")]
    Destroyed(String),

    #[error("Invalid worker state: {0}")]
    InvalidState(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// Classes that end the worker's life.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::BootstrapFailed(_)
                | Self::SessionIncomplete(_)
                | Self::AuthExpired { .. }
                | Self::QuotaExhausted { .. }
        )
    }

    /// True when the worker that produced this error can no longer be used.
    pub fn worker_gone(&self) -> bool {
        self.is_fatal() || matches!(self, Self::Destroyed(_))
    }

    /// Failures the caller may retry against the same worker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
