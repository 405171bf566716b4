use thiserror::Error;

/// Failure reported by a query executor for one delivery.
///
/// Callers must be able to tell a cache miss apart from a transport failure:
/// a miss under a cache-only policy is expected and retryable, while
/// transport errors usually surface to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The cache held no result for the query.
    #[error("results not cached")]
    CacheMiss,
    /// The remote source could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Any other executor failure.
    #[error("query failed: {0}")]
    Other(String),
}

impl QueryError {
    #[must_use]
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, QueryError::CacheMiss)
    }
}
