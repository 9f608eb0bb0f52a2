//! Error types for trax-client
//!
//! Every failure reaches the caller as one of a closed set of variants.
//! Local precondition failures are raised before any network call;
//! transport, protocol and timeout failures stay distinguishable.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credentials are missing or blank
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// The media file to upload could not be read
    #[error("media file read error: {path}: {source}")]
    MediaRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Connection refused or reset, malformed HTTP, redirect loop
    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Response body could not be parsed or had an unexpected status or shape
    #[error("{context}: {message}")]
    Protocol { context: String, message: String },

    /// The request exceeded the configured timeout and was aborted
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Writing a downloaded artifact failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded poll used up its ticks without seeing the job finish
    #[error("{what} not finished after {ticks} polls")]
    PollExhausted { what: String, ticks: u32 },

    /// Polling was cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// trax-common error
    #[error("Common error: {0}")]
    Common(#[from] trax_common::Error),
}

impl ClientError {
    /// Wrap a JSON parse failure: `bad json: <cause>`
    pub fn bad_json(message: impl ToString) -> Self {
        ClientError::Protocol {
            context: "bad json".to_string(),
            message: message.to_string(),
        }
    }

    /// Unexpected non-success HTTP status
    pub fn unexpected_status(status: u16, body: &str) -> Self {
        ClientError::Protocol {
            context: format!("unexpected status {}", status),
            message: body.chars().take(512).collect(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ClientError::Protocol { .. })
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
