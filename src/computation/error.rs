//! Computation-specific error types.

use std::io;

use thiserror::Error;

/// Result type for computation operations.
pub type ComputationResult<T> = Result<T, ComputationError>;

/// Errors raised while executing a query payload.
#[derive(Error, Debug)]
pub enum ComputationError {
    /// The backend rejected or failed the query. `code` carries the
    /// backend's numeric error code when it provides one.
    #[error("backend error: {message}{}", .code.map(|c| format!(" (code: {})", c)).unwrap_or_default())]
    Backend { code: Option<i32>, message: String },

    /// A free-form expression could not be evaluated.
    #[error("expression error: {0}")]
    Expression(String),

    /// A filter rule could not be applied (e.g. an invalid regexp).
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A step referenced a dataset the backend does not hold.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// A join spec was not linkable to the already-joined row set.
    #[error("join is not linkable: no joined alias among {0:?}")]
    UnlinkedJoin(Vec<String>),

    /// The wall-clock budget expired before the backend settled. The
    /// underlying call is abandoned, not cancelled.
    #[error("computation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Failed to spawn the computation service process.
    #[error("failed to spawn computation service: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Failed to write a request to the service.
    #[error("failed to write to computation service: {0}")]
    WriteFailed(#[source] io::Error),

    /// Failed to serialize a request.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Failed to deserialize a response.
    #[error("failed to deserialize response: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// The service process exited while requests were pending.
    #[error("computation service exited unexpectedly")]
    ServiceExited,

    /// Response channel closed without a response.
    #[error("response channel closed unexpectedly")]
    ChannelClosed,
}

impl ComputationError {
    /// Create a backend error with an optional numeric code.
    pub fn backend(code: Option<i32>, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
        }
    }

    /// Whether this rejection came from the timeout wrapper rather than
    /// the backend itself. Callers treat both the same but telemetry
    /// distinguishes them.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the service process is gone.
    pub fn is_service_exited(&self) -> bool {
        matches!(self, Self::ServiceExited | Self::ChannelClosed)
    }
}
