//! Error types for allocation operations

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Empty candidate set, or a selected identity's credentials could not
    /// be loaded (spec maps `CredentialsMissing` to this at the allocator
    /// boundary rather than surfacing the lower-level error kind).
    #[error("no token available: {0}")]
    NoTokenAvailable(String),

    #[error("store error: {0}")]
    Store(#[from] store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
