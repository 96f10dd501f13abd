//! Error types for relaykit-core

use thiserror::Error;

/// Main error type for the relaykit-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Event failed validation (malformed content, missing identity)
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error (missing upload credentials, bad config file)
    #[error("configuration error: {0}")]
    Config(String),

    /// A queue with this identifier already exists
    #[error("queue already exists: {0}")]
    QueueExists(String),

    /// No queue with this identifier is registered
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Durable storage could not be initialized or written
    #[error("storage error at {path}: {message}")]
    Storage { path: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upload transport error (network failure, server rejection)
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for relaykit-core
pub type Result<T> = std::result::Result<T, Error>;
