//! Retry classification for upstream refresh failures
//!
//! Replaces exception-as-control-flow for retryable vs. non-retryable
//! upstream errors with a typed classifier: a refresh attempt either should
//! be retried with backoff, or has failed fatally and must surface
//! immediately.

/// Outcome of classifying one refresh attempt's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retry,
    Fatal,
}

/// A non-HTTP-status failure reaching the refresh call (connect, timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
}

const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Classify a refresh attempt's outcome.
///
/// `status` is `None` when the attempt failed before a response arrived
/// (connection failure, timeout); in that case `transport_error` identifies
/// the failure kind and the attempt is always retryable.
pub fn classify(status: Option<u16>, transport_error: Option<TransportErrorKind>) -> Classification {
    if transport_error.is_some() {
        return Classification::Retry;
    }
    match status {
        Some(code) if RETRYABLE_STATUSES.contains(&code) => Classification::Retry,
        _ => Classification::Fatal,
    }
}
