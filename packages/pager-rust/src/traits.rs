use async_trait::async_trait;
use querypager_core::{Query, QueryError};
use tokio::sync::mpsc;

/// Where a delivered result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliverySource {
    /// The executor's local cache.
    Cache,
    /// The remote data source.
    Network,
}

impl DeliverySource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeliverySource::Cache => "cache",
            DeliverySource::Network => "network",
        }
    }
}

/// One result produced by a query execution.
#[derive(Debug, Clone)]
pub struct Delivery<R> {
    pub source: DeliverySource,
    pub result: Result<Vec<R>, QueryError>,
}

/// Channel end an executor pushes its deliveries into.
///
/// The receiving side belongs to the pager. Once the receiver is gone (the
/// load was cancelled or already terminated) `deliver` returns `false` and
/// the executor should stop producing results.
#[derive(Debug)]
pub struct DeliverySink<R> {
    tx: mpsc::Sender<Delivery<R>>,
}

impl<R> Clone for DeliverySink<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R: Send> DeliverySink<R> {
    /// Creates a sink and the receiver its deliveries arrive on.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery<R>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Reports one result. Returns `false` if nobody is listening anymore.
    pub async fn deliver(&self, source: DeliverySource, result: Result<Vec<R>, QueryError>) -> bool {
        self.tx.send(Delivery { source, result }).await.is_ok()
    }

    /// Whether the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Executes queries against a remote data source, possibly fronted by a cache.
///
/// Injected into each [`Pager`](crate::Pager) at construction. An execution
/// reports its results through `sink` and then returns:
/// - exactly one delivery for `NetworkOnly`, `CacheOnly`, and `CacheElseNetwork`;
/// - two deliveries for `CacheThenNetwork`, the cache result (or a
///   `CacheMiss` error) followed by the network result.
///
/// Used as `Arc<dyn QueryExecutor<R>>`.
#[async_trait]
pub trait QueryExecutor<R: Send + 'static>: Send + Sync {
    /// Runs `query`, pushing every result it produces into `sink`.
    async fn find(&self, query: Query, sink: DeliverySink<R>);
}
