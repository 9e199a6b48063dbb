//! Error types for a3s-chat

use thiserror::Error;

/// Errors that can occur in the chat system
#[derive(Debug, Error)]
pub enum ChatError {
    /// Durable storage failure (read, write, remove)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The external send operation failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Input failed a precondition (blank name, missing instruction, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Agent or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Injected agent service failure
    #[error("Service error: {0}")]
    Service(String),
}

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;
