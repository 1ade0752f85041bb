//! Error types for VoiceTrace
//!
//! These errors belong to the ambient layers (configuration, record
//! decoding, HTTP ingestion, server startup). The tracker and the store's
//! write path never surface them to the observed pipeline.

use thiserror::Error;

/// Result type alias using VoiceTrace's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for VoiceTrace operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
