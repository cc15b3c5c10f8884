//! Error types for the cassette proxy

use std::io;
use thiserror::Error;

use crate::cassette::RecordMode;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur while proxying, recording or replaying
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Inbound method is not one of GET, POST, PUT, PATCH, DELETE
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// Policy forbids a live call and nothing recorded matches
    #[error("No recorded interaction in cassette {cassette} (record mode: {mode})")]
    NoCassetteMatch {
        /// Cassette name (request fingerprint)
        cassette: String,
        /// Record mode the transaction ran under
        mode: RecordMode,
    },

    /// The real network call failed
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Cassette file exists but cannot be parsed
    #[error("Cassette {path} is corrupted: {reason}")]
    StorageCorruption {
        /// Path of the offending file
        path: String,
        /// Parser message
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Request too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    /// HTTP status the front-end reports for this error
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnsupportedMethod(_) => 405,
            Self::NoCassetteMatch { .. } => 404,
            Self::Upstream(_) => 502,
            Self::DataTooLarge { .. } => 413,
            _ => 500,
        }
    }
}
