//! kube-xds error abstractions.

use thiserror::Error;

/// A result type where the error is an `XdsError`.
pub type XdsResult<T> = ::std::result::Result<T, XdsError>;

/// Error variants of the reconciliation pipeline.
#[derive(Debug, Error)]
pub enum XdsError {
    /// The stored configuration document could not be decoded.
    #[error("failed to decode bootstrap config: {source}; content: {content}")]
    Decode {
        /// The raw content which failed to decode.
        content: String,
        #[source]
        source: serde_json::Error,
    },
    /// The configuration document could not be encoded for storage.
    #[error("failed to encode bootstrap config: {0}")]
    Encode(#[source] serde_json::Error),
    /// The configuration document failed validation before a write or publish.
    #[error("validation error: {0}")]
    Validation(String),
    /// A snapshot failed its consistency check.
    #[error("inconsistent snapshot: {0}")]
    Consistency(String),
    /// An optimistic concurrency conflict was returned by the config store.
    #[error("conflict writing config object: {0}")]
    StoreConflict(String),
    /// A network or API failure while talking to the config store.
    #[error("error communicating with config store: {0}")]
    TransientIo(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl XdsError {
    /// Check if this error is a retryable store conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StoreConflict(_))
    }

    /// A short static label for this error, used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode",
            Self::Encode(_) => "encode",
            Self::Validation(_) => "validation",
            Self::Consistency(_) => "consistency",
            Self::StoreConflict(_) => "conflict",
            Self::TransientIo(_) => "io",
        }
    }
}
