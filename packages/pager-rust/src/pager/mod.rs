//! Paged query result fetcher.
//!
//! A [`Pager`] drives sequential page loads against one [`Query`], merging
//! each page into a single ordered result list:
//!
//! - page `p` is fetched with `skip = p * page_size` and
//!   `limit = page_size + 1`; the extra probe record answers "is there a next
//!   page" without a count query and is never merged;
//! - every delivery (two of them under `CacheThenNetwork`) is spliced into
//!   the slot range of its page, overwriting what was there;
//! - loads observe the caller's cancellation token and the pager's own
//!   scope, which `clear` cancels, so a cancelled load never merges.
//!
//! All state lives behind one mutex. Merges and their change notifications
//! are additionally serialized so listeners observe changes in merge order.

mod load;
mod state;

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use querypager_core::Query;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ConfigError, PagerConfig};
use crate::error::PagerError;
use crate::listeners::{self, ListenerId, ListenerRegistration, ListenerSet, ObjectsChange, ObjectsChangedCallback};
use crate::traits::{DeliverySink, DeliverySource, QueryExecutor};

pub use load::{DeliveryCallback, PageDelivery, PageLoad};

use load::{AbortOnDrop, LoadCancellation};
use state::{detects_next_page, PagerState};

/// Point-in-time view of a pager, read under a single lock acquisition.
#[derive(Debug, Clone)]
pub struct PagerSnapshot<R> {
    pub objects: Arc<Vec<R>>,
    pub current_page: i64,
    pub has_next_page: bool,
    pub is_loading_next_page: bool,
}

struct PagerInner<R: Send + 'static> {
    query: Query,
    config: PagerConfig,
    executor: Arc<dyn QueryExecutor<R>>,
    state: Mutex<PagerState<R>>,
    /// Serializes merge + fan-out. Reentrant so a listener may clear the pager.
    merge_order: ReentrantMutex<()>,
    listeners: Arc<ListenerSet>,
}

/// Loads pages of a query and merges them into one ordered list.
///
/// Cheap to clone; clones share the same state. Loads run as Tokio tasks, so
/// the load methods must be called from within a Tokio runtime.
pub struct Pager<R: Send + 'static> {
    inner: Arc<PagerInner<R>>,
}

impl<R: Send + 'static> Clone for Pager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Clone + Send + Sync + 'static> Pager<R> {
    /// Creates a pager with the default page size.
    #[must_use]
    pub fn new(query: Query, executor: Arc<dyn QueryExecutor<R>>) -> Self {
        Self::build(query, executor, PagerConfig::default())
    }

    /// Creates a pager with the given page size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `page_size` is zero or too large.
    pub fn with_page_size(
        query: Query,
        page_size: usize,
        executor: Arc<dyn QueryExecutor<R>>,
    ) -> Result<Self, ConfigError> {
        Self::with_config(
            query,
            executor,
            PagerConfig {
                page_size,
                ..PagerConfig::default()
            },
        )
    }

    /// Creates a pager from a full configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration does not validate.
    pub fn with_config(
        query: Query,
        executor: Arc<dyn QueryExecutor<R>>,
        config: PagerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(query, executor, config))
    }

    /// Builds a pager from an already validated configuration.
    pub(crate) fn build(
        query: Query,
        executor: Arc<dyn QueryExecutor<R>>,
        config: PagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PagerInner {
                query,
                config,
                executor,
                state: Mutex::new(PagerState::new()),
                merge_order: ReentrantMutex::new(()),
                listeners: Arc::new(ListenerSet::new()),
            }),
        }
    }

    /// The base query this pager pages through.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.inner.query
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.inner.config.page_size
    }

    #[must_use]
    pub fn config(&self) -> &PagerConfig {
        &self.inner.config
    }

    /// Zero-based index of the last merged page; `-1` before the first merge.
    #[must_use]
    pub fn current_page(&self) -> i64 {
        self.inner.state.lock().current_page
    }

    #[must_use]
    pub fn has_next_page(&self) -> bool {
        self.inner.state.lock().has_next_page
    }

    /// Whether the most recently started load is still running.
    #[must_use]
    pub fn is_loading_next_page(&self) -> bool {
        self.inner.state.lock().is_loading()
    }

    /// Immutable snapshot of the merged records.
    #[must_use]
    pub fn objects(&self) -> Arc<Vec<R>> {
        Arc::clone(&self.inner.state.lock().objects)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().objects.is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> PagerSnapshot<R> {
        let state = self.inner.state.lock();
        PagerSnapshot {
            objects: Arc::clone(&state.objects),
            current_page: state.current_page,
            has_next_page: state.has_next_page,
            is_loading_next_page: state.is_loading(),
        }
    }

    /// Registers a change callback. Dropping the returned handle unregisters it.
    pub fn add_on_objects_changed_callback(
        &self,
        callback: Arc<dyn ObjectsChangedCallback>,
    ) -> ListenerRegistration {
        listeners::register(&self.inner.listeners, callback)
    }

    /// Unregisters a callback by id. Returns `false` if it was not registered.
    pub fn remove_on_objects_changed_callback(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Derives the query that fetches `page` from the base query.
    ///
    /// With pagination enabled the limit is `page_size + 1`, one more than a
    /// page, so the merge can tell whether a following page exists. With it
    /// disabled the limit is exactly `page_size` and the skip is left as is.
    #[must_use]
    pub fn page_query(&self, page: usize) -> Query {
        let page_size = self.page_size();
        let query = self.inner.query.clone();
        let limit = |n: usize| Some(u32::try_from(n).unwrap_or(u32::MAX));
        if self.inner.config.pagination_enabled {
            let skip = u32::try_from(page.saturating_mul(page_size)).unwrap_or(u32::MAX);
            query.with_skip(skip).with_limit(limit(page_size + 1))
        } else {
            query.with_limit(limit(page_size))
        }
    }

    /// Loads the page after the current one.
    ///
    /// Fails immediately with [`PagerError::NoMorePages`] if the last page
    /// was already merged; no query is dispatched in that case. Otherwise
    /// returns a handle resolving to the page's records once they are merged.
    /// Cancelling `token` before then resolves the handle with
    /// [`PagerError::Cancelled`] and leaves the pager untouched.
    ///
    /// Loads are meant to run one at a time: overlapping loads target the
    /// same page and are merged in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`PagerError::NoMorePages`] when `has_next_page()` is false.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn load_next_page(&self, token: Option<CancellationToken>) -> Result<PageLoad<R>, PagerError> {
        self.start_load(token, None)
    }

    /// Loads the page after the current one, reporting every delivery.
    ///
    /// `callback` runs after each delivery was merged (or failed), so under
    /// `CacheThenNetwork` it typically runs twice for one call: once for
    /// the cached page and once for the network page. The returned handle
    /// resolves once the final delivery arrived, or earlier on cancellation
    /// or on an error other than a cache miss of the cache phase.
    ///
    /// # Errors
    ///
    /// Returns [`PagerError::NoMorePages`] when `has_next_page()` is false.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn load_next_page_with<F>(
        &self,
        callback: F,
        token: Option<CancellationToken>,
    ) -> Result<PageLoad<R>, PagerError>
    where
        F: FnMut(PageDelivery<R>) + Send + 'static,
    {
        self.start_load(token, Some(Box::new(callback)))
    }

    /// Discards every merged page and returns to the initial state.
    ///
    /// Loads started before the call are cancelled and will never merge.
    /// Listeners receive `on_changed`.
    pub fn clear(&self) {
        let _ordered = self.inner.merge_order.lock();
        self.inner.state.lock().reset();
        debug!(collection = %self.inner.query.collection, "pager cleared");
        self.inner.listeners.notify(ObjectsChange::Reset);
    }

    fn start_load(
        &self,
        token: Option<CancellationToken>,
        callback: Option<DeliveryCallback<R>>,
    ) -> Result<PageLoad<R>, PagerError> {
        let (page, generation, scope) = {
            let mut state = self.inner.state.lock();
            if !state.has_next_page {
                return Err(PagerError::NoMorePages);
            }
            let page = usize::try_from(state.current_page + 1).unwrap_or(0);
            (page, state.begin_load(), state.scope.clone())
        };

        let query = self.page_query(page);
        let cancellation = LoadCancellation::new(scope, token);
        let pager = self.clone();
        let handle = tokio::spawn(async move {
            pager
                .run_load(page, query, cancellation, generation, callback)
                .await
        });
        Ok(PageLoad::new(page, handle))
    }

    async fn run_load(
        self,
        page: usize,
        query: Query,
        cancellation: LoadCancellation,
        generation: u64,
        mut callback: Option<DeliveryCallback<R>>,
    ) -> Result<Vec<R>, PagerError> {
        let _in_flight = InFlight {
            pager: self.clone(),
            generation,
        };
        let mut report = |source: Option<DeliverySource>, result: &Result<Vec<R>, PagerError>| {
            if let Some(callback) = callback.as_mut() {
                callback(PageDelivery {
                    page,
                    source,
                    result: result.clone(),
                });
            }
        };

        let outcome = self.drive_load(page, query, &cancellation, &mut report).await;

        let label = match &outcome {
            Ok(_) => "merged",
            Err(PagerError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        metrics::counter!("querypager_page_loads_total", "outcome" => label).increment(1);
        outcome
    }

    /// Dispatches the page query and consumes its deliveries.
    async fn drive_load(
        &self,
        page: usize,
        query: Query,
        cancellation: &LoadCancellation,
        report: &mut (dyn FnMut(Option<DeliverySource>, &Result<Vec<R>, PagerError>) + Send),
    ) -> Result<Vec<R>, PagerError> {
        if cancellation.is_cancelled() {
            let cancelled = Err(PagerError::Cancelled);
            report(None, &cancelled);
            return cancelled;
        }

        let expected = query.cache_policy.delivery_count();
        let probing = detects_next_page(query.limit, self.page_size());
        debug!(
            page,
            skip = query.skip,
            limit = ?query.limit,
            policy = ?query.cache_policy,
            "dispatching page query"
        );

        let (sink, mut deliveries) = DeliverySink::channel(expected);
        let executor = Arc::clone(&self.inner.executor);
        let _executor_task = AbortOnDrop(tokio::spawn(async move {
            executor.find(query, sink).await;
        }));

        let mut received = 0;
        let mut outcome: Option<Result<Vec<R>, PagerError>> = None;
        while received < expected {
            let delivery = tokio::select! {
                biased;
                () = cancellation.cancelled() => None,
                delivery = deliveries.recv() => Some(delivery),
            };
            let Some(delivery) = delivery else {
                let cancelled = Err(PagerError::Cancelled);
                report(None, &cancelled);
                return cancelled;
            };
            let Some(delivery) = delivery else {
                // Executor returned (or panicked) without further deliveries.
                break;
            };
            received += 1;

            let source = delivery.source;
            let result = match delivery.result {
                Ok(records) => self.merge_page(page, records, probing, cancellation),
                Err(_) if cancellation.is_cancelled() => Err(PagerError::Cancelled),
                Err(err) => Err(PagerError::Query(err)),
            };
            report(Some(source), &result);

            match result {
                Ok(records) => outcome = Some(Ok(records)),
                Err(PagerError::Query(err))
                    if err.is_cache_miss() && source == DeliverySource::Cache && received < expected =>
                {
                    debug!(page, "cache miss before network delivery");
                    outcome = Some(Err(PagerError::Query(err)));
                }
                Err(err) => return Err(err),
            }
        }

        outcome.unwrap_or_else(|| {
            warn!(page, "executor finished without delivering a result");
            Err(PagerError::Internal(
                "executor finished without delivering a result".to_string(),
            ))
        })
    }

    /// Applies one page of results, then notifies listeners.
    fn merge_page(
        &self,
        page: usize,
        records: Vec<R>,
        probing: bool,
        cancellation: &LoadCancellation,
    ) -> Result<Vec<R>, PagerError> {
        let _ordered = self.inner.merge_order.lock();
        let merged = {
            let mut state = self.inner.state.lock();
            // Checked under the lock so a concurrent `clear` always wins.
            if cancellation.is_cancelled() {
                return Err(PagerError::Cancelled);
            }
            state.merge(page, records, self.page_size(), probing)
        };

        match merged {
            Ok(outcome) => {
                let kind = match outcome.change {
                    ObjectsChange::RangeInserted { .. } => "inserted",
                    _ => "changed",
                };
                metrics::counter!("querypager_merges_total", "kind" => kind).increment(1);
                debug!(
                    page,
                    item_count = outcome.records.len(),
                    has_next_page = outcome.has_next_page,
                    kind,
                    "merged page"
                );
                self.inner.listeners.notify(outcome.change);
                Ok(outcome.records)
            }
            Err(gap) => {
                warn!(%gap, "rejected page merge");
                Err(PagerError::Internal(gap.to_string()))
            }
        }
    }
}

/// Clears the in-flight flag when a load task ends, unwinding included.
struct InFlight<R: Send + 'static> {
    pager: Pager<R>,
    generation: u64,
}

impl<R: Send + 'static> Drop for InFlight<R> {
    fn drop(&mut self) {
        self.pager.inner.state.lock().finish_load(self.generation);
    }
}
