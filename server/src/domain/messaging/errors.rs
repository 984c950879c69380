//! Layered error type for the messaging core (§7)

use thiserror::Error;

use crate::data::cache::CacheError;
use crate::data::error::DataError;
use crate::data::streams::StreamError;

/// Domain-boundary error returned by the messaging core's public operations.
///
/// Lower-layer errors (`DataError`, `StreamError`, `CacheError`) are folded in
/// via `#[from]`; `is_transient()` mirrors `DataError::is_transient` so
/// callers can decide whether to route an entry into the WAL/Retry path
/// without matching on the wrapped variant.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Missing/oversized field, unknown type/status, non-participant actor.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bad/expired bearer token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Message or conversation absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Actor not owner for edit/delete, not participant for send.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Repository timeout or 5xx; captured by the circuit breaker.
    #[error("transient store error: {0}")]
    TransientStore(#[from] DataError),

    /// Append-log unavailable or the in-memory overflow buffer is full.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Cache backend unavailable.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Malformed stream entry; removed from source, logged, never retried.
    #[error("poison message on {stream} ({id}): {reason}")]
    PoisonMessage {
        stream: String,
        id: String,
        reason: String,
    },

    /// The circuit is open and refusing calls.
    #[error("circuit open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    /// The in-process overflow queue absorbing stream-append failures is full.
    #[error("publish overflow queue is full")]
    Overflow,
}

impl MessagingError {
    /// Whether this failure is worth retrying via WAL/Retry rather than
    /// surfaced immediately to the caller (§7 `TransientStoreError`).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientStore(e) => e.is_transient(),
            Self::CircuitOpen { .. } => true,
            Self::Stream(_) | Self::Cache(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_store_error_classification_follows_data_error() {
        let transient = MessagingError::TransientStore(DataError::timeout(5));
        assert!(transient.is_transient());

        let terminal = MessagingError::TransientStore(DataError::NotFound("m1".into()));
        assert!(!terminal.is_transient());
    }

    #[test]
    fn test_validation_and_forbidden_are_never_transient() {
        assert!(!MessagingError::Validation("bad".into()).is_transient());
        assert!(!MessagingError::Forbidden("not owner".into()).is_transient());
    }

    #[test]
    fn test_circuit_open_is_transient() {
        assert!(MessagingError::CircuitOpen { retry_after_ms: 1000 }.is_transient());
    }
}
