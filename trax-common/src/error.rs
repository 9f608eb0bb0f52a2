//! Common error types for trax

use thiserror::Error;

/// Common result type for trax operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the client library and the CLI
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or artifact content
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
