//! Error types for persistent identity storage

/// Errors from persistent store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("identity not found: {0}")]
    NotFound(u64),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
