use querypager_core::QueryError;
use thiserror::Error;

/// Errors surfaced by [`Pager`](crate::Pager) loads.
///
/// Cancellation is reported as its own variant so callers can tell an
/// abandoned load from a failed one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PagerError {
    /// `load_next_page` was called after the last page had been merged.
    #[error("unable to load next page when there are no more pages available")]
    NoMorePages,
    /// The load was cancelled before its results were merged.
    #[error("page load cancelled")]
    Cancelled,
    /// The query executor reported a failure.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// The load could not complete for a reason outside the executor contract.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PagerError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PagerError::Cancelled)
    }
}
