//! Error types for `livetail` core library.

use thiserror::Error;

/// Result type alias using the core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `livetail` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown stream event name
    #[error("Unknown stream event: {0}")]
    UnknownEvent(String),

    /// Chunk content was not valid transport encoding
    #[error("Invalid chunk encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
