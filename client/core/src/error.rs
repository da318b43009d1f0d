//! Client Errors
//!
//! Error types shared by the fallback client, the API wrappers, the chat
//! stores and the local state file.

use thiserror::Error;

use crate::fallback::TransportError;

/// Errors raised by the client core
#[derive(Debug, Error)]
pub enum ClientError {
    /// A required setting is missing; nothing was sent
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// Endpoint paths must be origin-relative
    #[error("endpoint must start with '/': {0}")]
    InvalidEndpoint(String),

    /// Both the primary and the production origin failed
    #[error("request to {endpoint} failed on both origins (primary: {primary}; production: {production})")]
    FallbackExhausted {
        /// Endpoint path that was requested
        endpoint: String,
        /// Why the primary attempt failed
        primary: String,
        /// Why the production attempt failed
        production: String,
    },

    /// The request was aborted by the caller
    #[error("request aborted")]
    Aborted,

    /// HTTP transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Non-2xx response
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Response body could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A 2xx response did not carry the expected fields
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The chat store rejected or could not serve a request
    #[error("chat store error: {0}")]
    Store(String),

    /// Local state file I/O failure
    #[error("local state I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image attachment failed validation
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

impl ClientError {
    /// Whether this error was caused by the caller aborting
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Build a status error, truncating long bodies
    pub(crate) fn status(status: u16, body: &str) -> Self {
        const MAX_BODY: usize = 512;
        let body = match body.char_indices().nth(MAX_BODY) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        };
        Self::Status { status, body }
    }
}
