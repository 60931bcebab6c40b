//! Error taxonomy for the credential lifecycle core

/// Errors from credential manager and registry operations.
///
/// Each variant is independently matchable — no error wraps another error's
/// type identity opaquely, so a caller can decide retry vs. surface-to-user
/// from the `kind` alone.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identity has no refresh token configured")]
    NoRefreshToken,

    #[error("upstream transient failure after retries: {0}")]
    UpstreamTransient(String),

    #[error("upstream refused the refresh request: {0}")]
    UpstreamRefused(String),

    #[error("upstream response was malformed: {0}")]
    MalformedResponse(String),

    #[error("credentials missing for identity {0}")]
    CredentialsMissing(u64),

    #[error("store error: {0}")]
    Store(#[from] store::Error),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
