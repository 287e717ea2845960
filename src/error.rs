//! Error types for Stratum

use thiserror::Error;

/// Result type alias for Stratum operations
pub type Result<T> = std::result::Result<T, StratumError>;

/// Main error type for Stratum
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Memory not found: {0}")]
    MemoryNotFound(i64),

    #[error("Path not found: {domain}://{path}")]
    PathNotFound { domain: String, path: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stale state for memory {memory_id}: expected {expected}, found {actual}")]
    StaleState {
        memory_id: i64,
        expected: String,
        actual: String,
    },

    #[error("Index job queue full")]
    QueueFull,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StratumError {
    /// Whether this error represents a transient, retryable condition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StratumError::Http(_) | StratumError::QueueFull)
    }

    /// JSON-RPC style error code, used by the MCP transport.
    pub fn code(&self) -> i64 {
        match self {
            StratumError::MemoryNotFound(_)
            | StratumError::PathNotFound { .. }
            | StratumError::JobNotFound(_) => -32001,
            StratumError::Validation(_) => -32602,
            StratumError::AuthFailed(_) => -32003,
            StratumError::Conflict(_) | StratumError::StaleState { .. } => -32005,
            StratumError::QueueFull => -32006,
            _ => -32000,
        }
    }

    /// HTTP status code mapping, per the boundary error-kind table.
    pub fn http_status(&self) -> u16 {
        match self {
            StratumError::Validation(_) => 422,
            StratumError::MemoryNotFound(_)
            | StratumError::PathNotFound { .. }
            | StratumError::JobNotFound(_) => 404,
            StratumError::Conflict(_) | StratumError::StaleState { .. } => 409,
            StratumError::QueueFull => 503,
            StratumError::AuthFailed(_) => 401,
            StratumError::Fatal(_) => 500,
            _ => 500,
        }
    }
}
