//! Error types for the relay-link client library.

use thiserror::Error;

/// Errors produced by session and transport operations.
///
/// The enum derives `Clone` because a single handshake failure must be
/// delivered to every caller awaiting the same in-flight connect attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The session task has shut down and can no longer accept operations.
    #[error("Session is closed")]
    Closed,
}

/// Result type for relay-link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
