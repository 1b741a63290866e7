//! Error types for bucket listing and probing.

/// Errors returned by an [`ObjectStoreClient`](crate::ObjectStoreClient).
///
/// Variants are split into transient failures, which the
/// [`RetryingClient`](crate::RetryingClient) retries, and terminal ones,
/// which are surfaced to the caller immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Connection reset, DNS failure, dropped stream
    #[error("network error: {0}")]
    Network(String),

    /// A single attempt ran past the per-request timeout
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Store asked us to back off (503 / SlowDown)
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 5xx-class failure on the store side
    #[error("internal store error: {0}")]
    Internal(String),

    /// Credentials rejected
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The configured bucket does not exist
    #[error("bucket '{0}' does not exist")]
    NoSuchBucket(String),

    /// Key or prefix not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request, unsupported operation or bad configuration
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A truncated page carried neither a marker nor any content key to
    /// continue from
    #[error("listing truncated after '{after}' without a continuation marker")]
    MissingContinuation {
        /// Marker the failing page was requested with (empty for the first page)
        after: String,
    },

    /// Anything the adapter could not classify more precisely
    #[error("object store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a failed request may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_)
                | StoreError::Timeout(_)
                | StoreError::ServiceUnavailable(_)
                | StoreError::Internal(_)
        )
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
