//! In-memory [`QueryExecutor`] with a result cache.
//!
//! [`MemoryQueryExecutor`] evaluates queries against collections held in
//! memory and honours every [`CachePolicy`]. Network fetches can be delayed
//! or made to fail, which makes it suitable for tests, demos, and offline
//! fixtures.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use querypager_core::{CachePolicy, Query, QueryError, Record};
use tracing::debug;

use crate::traits::{DeliverySink, DeliverySource, QueryExecutor};

/// Query executor over in-memory collections.
///
/// The "network" is the collection map; the cache stores the last network
/// result of each distinct query (keyed by [`Query::cache_key`]).
pub struct MemoryQueryExecutor {
    collections: DashMap<String, Vec<Record>>,
    cache: DashMap<String, Vec<Record>>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
    find_count: AtomicUsize,
}

impl MemoryQueryExecutor {
    /// Creates an executor with no collections and an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            cache: DashMap::new(),
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            find_count: AtomicUsize::new(0),
        }
    }

    /// Creates an executor holding a single collection.
    #[must_use]
    pub fn with_collection(name: impl Into<String>, records: Vec<Record>) -> Self {
        let executor = Self::new();
        executor.replace_records(name, records);
        executor
    }

    /// Replaces the contents of a collection. The cache is left untouched,
    /// so cached results become stale until the next network fetch.
    pub fn replace_records(&self, collection: impl Into<String>, records: Vec<Record>) {
        self.collections.insert(collection.into(), records);
    }

    /// Appends one record to a collection, creating it if needed.
    pub fn push_record(&self, collection: &str, record: Record) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    /// Stores `records` as the cached result of `query`.
    pub fn prime_cache(&self, query: &Query, records: Vec<Record>) {
        self.cache.insert(query.cache_key(), records);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Makes network fetches fail with `ConnectionFailed` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Delays every network fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Number of `find` executions so far.
    #[must_use]
    pub fn find_count(&self) -> usize {
        self.find_count.load(Ordering::Relaxed)
    }

    fn cached(&self, query: &Query) -> Option<Vec<Record>> {
        self.cache.get(&query.cache_key()).map(|entry| entry.value().clone())
    }

    async fn fetch_network(&self, query: &Query) -> Result<Vec<Record>, QueryError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::Relaxed) {
            return Err(QueryError::ConnectionFailed("executor is offline".to_string()));
        }
        let results = self
            .collections
            .get(&query.collection)
            .map(|entry| query.apply(entry.value()))
            .unwrap_or_default();
        self.cache.insert(query.cache_key(), results.clone());
        Ok(results)
    }
}

impl Default for MemoryQueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExecutor<Record> for MemoryQueryExecutor {
    async fn find(&self, query: Query, sink: DeliverySink<Record>) {
        self.find_count.fetch_add(1, Ordering::Relaxed);
        debug!(
            collection = %query.collection,
            skip = query.skip,
            limit = ?query.limit,
            policy = ?query.cache_policy,
            "executing query"
        );

        match query.cache_policy {
            CachePolicy::NetworkOnly => {
                let result = self.fetch_network(&query).await;
                sink.deliver(DeliverySource::Network, result).await;
            }
            CachePolicy::CacheOnly => {
                let result = self.cached(&query).ok_or(QueryError::CacheMiss);
                sink.deliver(DeliverySource::Cache, result).await;
            }
            CachePolicy::CacheElseNetwork => {
                if let Some(hit) = self.cached(&query) {
                    sink.deliver(DeliverySource::Cache, Ok(hit)).await;
                } else {
                    let result = self.fetch_network(&query).await;
                    sink.deliver(DeliverySource::Network, result).await;
                }
            }
            CachePolicy::CacheThenNetwork => {
                let cached = self.cached(&query).ok_or(QueryError::CacheMiss);
                if !sink.deliver(DeliverySource::Cache, cached).await {
                    return;
                }
                let result = self.fetch_network(&query).await;
                sink.deliver(DeliverySource::Network, result).await;
            }
        }
    }
}
