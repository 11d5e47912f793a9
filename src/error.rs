//! Error types for engagement-cache-core

use thiserror::Error;

/// Failures reported by a durable key-value backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Quota exceeded writing {key} ({bytes} bytes)")]
    QuotaExceeded { key: String, bytes: usize },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors raised while persisting or loading the engagement index.
#[derive(Error, Debug)]
pub enum EngagementError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt chunk set for {collection}: {reason}")]
    CorruptChunkSet { collection: String, reason: String },
}

/// Configuration parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = EngagementError> = std::result::Result<T, E>;
