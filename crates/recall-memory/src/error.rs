use recall_access::{Namespace, Operation};
use thiserror::Error;

/// Result type for vector store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised by a [`crate::VectorStore`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("vector store rejected request: {0}")]
    Rejected(String),
}

/// Errors raised by an [`crate::EmbeddingProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyText,
    #[error("embedding provider unreachable: {0}")]
    Unreachable(String),
}

/// Transient backend failure behind a `StoreUnavailable` error.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Errors raised while converting store metadata into typed records.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record '{record_id}' is missing required field '{field}'")]
    MissingField {
        record_id: String,
        field: &'static str,
    },
    #[error("record '{record_id}' has invalid field '{field}': {reason}")]
    InvalidField {
        record_id: String,
        field: &'static str,
        reason: String,
    },
    #[error("record '{record_id}' is a {found} record, expected {expected}")]
    WrongRecordType {
        record_id: String,
        expected: &'static str,
        found: String,
    },
    #[error("record '{record_id}' has malformed JSON in '{field}': {source}")]
    MalformedComposite {
        record_id: String,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by [`crate::MemoryGateway`] operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("restricted: {operation} is not permitted in namespace '{namespace}'")]
    Restricted {
        operation: Operation,
        namespace: Namespace,
    },
    #[error(
        "{operation} in namespace '{namespace}' could not reach the backend (record {}): {source}",
        .record_id.as_deref().unwrap_or("-")
    )]
    StoreUnavailable {
        operation: Operation,
        namespace: Namespace,
        record_id: Option<String>,
        #[source]
        source: BackendError,
    },
    #[error(
        "{operation} of record '{record_id}' in namespace '{namespace}' was not reflected after {attempts} verification attempts; re-check before retrying"
    )]
    VerificationTimeout {
        operation: Operation,
        namespace: Namespace,
        record_id: String,
        attempts: usize,
    },
    #[error("{operation} of record '{record_id}' in namespace '{namespace}' was cancelled during verification")]
    Cancelled {
        operation: Operation,
        namespace: Namespace,
        record_id: String,
    },
    #[error("linking '{source_id}' -> '{target_id}' failed (partial write: {partial}): {reason}")]
    LinkFailed {
        source_id: String,
        target_id: String,
        partial: bool,
        reason: String,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl GatewayError {
    pub(crate) fn backend(
        operation: Operation,
        namespace: Namespace,
        record_id: Option<&str>,
        source: impl Into<BackendError>,
    ) -> Self {
        Self::StoreUnavailable {
            operation,
            namespace,
            record_id: record_id.map(str::to_string),
            source: source.into(),
        }
    }

    /// Stable machine-readable code for tool payloads.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Restricted { .. } => "restricted",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::VerificationTimeout { .. } => "verification_timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::LinkFailed { .. } => "link_failed",
            Self::Codec(_) => "decode_error",
        }
    }

    /// Returns true when a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}
