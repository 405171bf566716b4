//! Load handles, per-delivery callbacks, and cancellation plumbing.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PagerError;
use crate::traits::DeliverySource;

/// One delivery of a page as seen by a callback-style load.
///
/// `result` holds the page's records after they were merged, or the error
/// that delivery carried. A cancelled load reports one final
/// `Err(PagerError::Cancelled)` delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDelivery<R> {
    pub page: usize,
    pub source: Option<DeliverySource>,
    pub result: Result<Vec<R>, PagerError>,
}

/// Callback invoked for every delivery of a callback-style load.
pub type DeliveryCallback<R> = Box<dyn FnMut(PageDelivery<R>) + Send + 'static>;

/// Handle to a running page load.
///
/// Resolves to the records of the loaded page. Dropping the handle does not
/// cancel the load; cancel its token instead.
#[derive(Debug)]
#[must_use = "a PageLoad does nothing observable unless awaited or its token is cancelled"]
pub struct PageLoad<R> {
    page: usize,
    handle: JoinHandle<Result<Vec<R>, PagerError>>,
}

impl<R> PageLoad<R> {
    pub(crate) fn new(page: usize, handle: JoinHandle<Result<Vec<R>, PagerError>>) -> Self {
        Self { page, handle }
    }

    /// The page this load fetches.
    #[must_use]
    pub fn page(&self) -> usize {
        self.page
    }

    /// Whether the load has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<R> Future for PageLoad<R> {
    type Output = Result<Vec<R>, PagerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(join_err)) if join_err.is_cancelled() => {
                Poll::Ready(Err(PagerError::Cancelled))
            }
            Poll::Ready(Err(join_err)) => Poll::Ready(Err(PagerError::Internal(format!(
                "page load task failed: {join_err}"
            )))),
        }
    }
}

/// Cancellation signal of one load: the pager's scope plus the caller's token.
#[derive(Debug, Clone)]
pub(crate) struct LoadCancellation {
    scope: CancellationToken,
    caller: Option<CancellationToken>,
}

impl LoadCancellation {
    pub(crate) fn new(scope: CancellationToken, caller: Option<CancellationToken>) -> Self {
        Self { scope, caller }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled() || self.caller.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Completes once either token is cancelled.
    pub(crate) async fn cancelled(&self) {
        match &self.caller {
            Some(caller) => {
                tokio::select! {
                    () = self.scope.cancelled() => {}
                    () = caller.cancelled() => {}
                }
            }
            None => self.scope.cancelled().await,
        }
    }
}

/// Aborts the wrapped task when dropped.
pub(crate) struct AbortOnDrop<T>(pub(crate) JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
