//! Canonical error and result types for the crate.
//!
//! [`ConsumerError`] is the single error surface returned by readers,
//! consumers and sessions. [`ConsumerError::kind`] groups its variants into
//! the categories callers act on: retry, give up, or change the request.

use std::time::Duration;

use thiserror::Error;

use crate::{schema::SchemaError, transport::TransportError};

/// Result alias for fallible client operations.
pub type Result<T, E = ConsumerError> = std::result::Result<T, E>;

/// Broad categories of [`ConsumerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient connectivity failure; the operation may be retried.
    Connection,
    /// The reader, consumer or session was closed.
    Closed,
    /// A caller supplied deadline elapsed.
    Timeout,
    /// The caller cancelled the operation.
    Cancelled,
    /// The request has no single answer; the caller must change it.
    AmbiguousOperation,
    /// Malformed configuration, schema or payload.
    Validation,
}

/// Errors returned by the public client surface.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The connection failed while the request was in flight.
    #[error("connection error: {0}")]
    Connection(#[source] TransportError),
    /// The session is reconnecting and cannot serve the request yet.
    #[error("partition session for {topic} is not ready")]
    NotReady { topic: String },
    /// The operation was attempted after close.
    #[error("consumer closed")]
    Closed,
    /// The caller's deadline elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
    /// The request is ambiguous for this topic layout.
    #[error("ambiguous operation: {0}")]
    AmbiguousOperation(&'static str),
    /// Invalid options.
    #[error("invalid configuration: {0}")]
    Validation(String),
    /// Invalid schema definition or undecodable payload.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The broker refused the request.
    #[error("broker rejected request: {0}")]
    Rejected(String),
}

impl ConsumerError {
    /// Category of the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::NotReady { .. } => ErrorKind::Connection,
            Self::Closed => ErrorKind::Closed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AmbiguousOperation(_) => ErrorKind::AmbiguousOperation,
            Self::Validation(_) | Self::Schema(_) | Self::Rejected(_) => ErrorKind::Validation,
        }
    }

    /// Whether repeating the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Timeout)
    }
}

impl From<TransportError> for ConsumerError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Rejected(reason) => Self::Rejected(reason),
            other => Self::Connection(other),
        }
    }
}
