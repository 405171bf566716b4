//! Headless list adapter over a [`Pager`].
//!
//! [`QueryAdapter`] drives a pager the way a scrolling list view would: it
//! builds the base query from a [`QueryFactory`], loads the first page when an
//! observer attaches, exposes the merged records plus a trailing "load more"
//! cell, and reports load progress to [`OnQueryLoadListener`]s.
//!
//! The adapter owns exactly one pager at a time. `clear()` cancels it and
//! swaps in a fresh one, so results of loads started earlier can never reach
//! the new list.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use querypager_core::{CachePolicy, Query};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{AdapterConfig, ConfigError};
use crate::error::PagerError;
use crate::listeners::{self, ListenerId, ListenerRegistration, ListenerSet, ObjectsChange, ObjectsChangedCallback};
use crate::pager::{PageDelivery, PageLoad, Pager, PagerSnapshot};
use crate::traits::QueryExecutor;

// ---------------------------------------------------------------------------
// Public traits and types
// ---------------------------------------------------------------------------

/// Builds the base query of every pager the adapter creates.
///
/// Any `Fn() -> Query` closure is a factory.
pub trait QueryFactory: Send + Sync {
    fn create(&self) -> Query;
}

impl<F> QueryFactory for F
where
    F: Fn() -> Query + Send + Sync,
{
    fn create(&self) -> Query {
        self()
    }
}

/// Observer of load progress.
///
/// `on_loading` fires when a load starts; `on_loaded` fires for every
/// delivery that reached the list or failed. Cancelled loads report nothing,
/// and neither does a cache miss under `CacheOnly`.
pub trait OnQueryLoadListener<R>: Send + Sync {
    fn on_loading(&self) {}

    fn on_loaded(&self, result: Result<&[R], &PagerError>);
}

/// One row of the adapter's list.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterItem<R> {
    Object(R),
    /// The trailing row that loads the next page when activated.
    NextPageCell,
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// The current pager, the token its loads observe, and the forwarding of its
/// change notifications to the adapter's observers.
struct PagerSlot<R: Send + 'static> {
    pager: Pager<R>,
    scope: CancellationToken,
    _forwarding: ListenerRegistration,
}

impl<R: Clone + Send + Sync + 'static> PagerSlot<R> {
    fn new(
        query: Query,
        executor: Arc<dyn QueryExecutor<R>>,
        config: &AdapterConfig,
        observers: &Arc<ListenerSet>,
    ) -> Self {
        let pager = Pager::build(query, executor, config.pager_config());
        let forwarding = pager.add_on_objects_changed_callback(Arc::new(Forward(Arc::clone(observers))));
        Self {
            pager,
            scope: CancellationToken::new(),
            _forwarding: forwarding,
        }
    }
}

/// Re-emits a pager's changes on the adapter's observer set.
struct Forward(Arc<ListenerSet>);

impl ObjectsChangedCallback for Forward {
    fn on_changed(&self) {
        self.0.notify(ObjectsChange::Reset);
    }

    fn on_item_range_changed(&self, position_start: usize, item_count: usize) {
        self.0.notify(ObjectsChange::RangeChanged {
            position_start,
            item_count,
        });
    }

    fn on_item_range_inserted(&self, position_start: usize, item_count: usize) {
        self.0.notify(ObjectsChange::RangeInserted {
            position_start,
            item_count,
        });
    }
}

struct LoadListeners<R> {
    next_id: AtomicU64,
    listeners: DashMap<ListenerId, Arc<dyn OnQueryLoadListener<R>>>,
}

impl<R> LoadListeners<R> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: DashMap::new(),
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn OnQueryLoadListener<R>>> {
        self.listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn loading(&self) {
        for listener in self.snapshot() {
            listener.on_loading();
        }
    }

    fn loaded(&self, result: Result<&[R], &PagerError>) {
        for listener in self.snapshot() {
            listener.on_loaded(result);
        }
    }

    fn delivered(&self, delivery: &PageDelivery<R>, policy: CachePolicy) {
        match &delivery.result {
            Err(PagerError::Cancelled) => {}
            Err(PagerError::Query(err)) if err.is_cache_miss() && policy == CachePolicy::CacheOnly => {
                debug!(page = delivery.page, "ignoring cache miss");
            }
            result => self.loaded(result.as_deref()),
        }
    }
}

/// Row layout computed from a single pager snapshot.
struct Rows<R> {
    snapshot: PagerSnapshot<R>,
    pagination_enabled: bool,
}

impl<R: Clone> Rows<R> {
    fn cell_row(&self) -> Option<usize> {
        let objects = &self.snapshot.objects;
        (self.pagination_enabled && !objects.is_empty() && self.snapshot.has_next_page)
            .then_some(objects.len())
    }

    fn count(&self) -> usize {
        self.snapshot.objects.len() + usize::from(self.cell_row().is_some())
    }

    fn item(&self, index: usize) -> Option<AdapterItem<R>> {
        if let Some(object) = self.snapshot.objects.get(index) {
            return Some(AdapterItem::Object(object.clone()));
        }
        (Some(index) == self.cell_row()).then_some(AdapterItem::NextPageCell)
    }
}

// ---------------------------------------------------------------------------
// QueryAdapter
// ---------------------------------------------------------------------------

/// Paged list model backed by a query.
pub struct QueryAdapter<R: Send + 'static> {
    factory: Box<dyn QueryFactory>,
    executor: Arc<dyn QueryExecutor<R>>,
    config: AdapterConfig,
    autoload: AtomicBool,
    slot: ArcSwap<PagerSlot<R>>,
    observers: Arc<ListenerSet>,
    load_listeners: Arc<LoadListeners<R>>,
}

impl<R: Clone + Send + Sync + 'static> QueryAdapter<R> {
    /// Creates an adapter. Nothing is loaded until an observer attaches
    /// (with autoload on) or `load_objects` is called.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `objects_per_page` is invalid.
    pub fn new(
        factory: impl QueryFactory + 'static,
        executor: Arc<dyn QueryExecutor<R>>,
        config: AdapterConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let observers = Arc::new(ListenerSet::new());
        let slot = PagerSlot::new(factory.create(), Arc::clone(&executor), &config, &observers);
        Ok(Self {
            factory: Box::new(factory),
            executor,
            autoload: AtomicBool::new(config.autoload),
            config,
            slot: ArcSwap::from_pointee(slot),
            observers,
            load_listeners: Arc::new(LoadListeners::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    #[must_use]
    pub fn objects_per_page(&self) -> usize {
        self.config.objects_per_page
    }

    #[must_use]
    pub fn pagination_enabled(&self) -> bool {
        self.config.pagination_enabled
    }

    #[must_use]
    pub fn autoload(&self) -> bool {
        self.autoload.load(Ordering::Acquire)
    }

    /// The pager currently backing the list.
    #[must_use]
    pub fn pager(&self) -> Pager<R> {
        self.slot.load().pager.clone()
    }

    #[must_use]
    pub fn objects(&self) -> Arc<Vec<R>> {
        self.slot.load().pager.objects()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.slot.load().pager.is_loading_next_page()
    }

    /// Removes every loaded record and cancels running loads.
    ///
    /// Observers receive `on_changed`.
    pub fn clear(&self) {
        let fresh = PagerSlot::new(
            self.factory.create(),
            Arc::clone(&self.executor),
            &self.config,
            &self.observers,
        );
        let previous = self.slot.swap(Arc::new(fresh));
        previous.scope.cancel();
        previous.pager.clear();
        debug!("adapter cleared");
    }

    /// Clears the list and loads the first page.
    ///
    /// # Errors
    ///
    /// Never fails on a fresh pager; see [`QueryAdapter::load_next_page`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn load_objects(&self) -> Result<PageLoad<R>, PagerError> {
        self.clear();
        self.load_next_page()
    }

    /// Loads the page following the loaded ones and appends it to the list.
    ///
    /// # Errors
    ///
    /// Returns [`PagerError::NoMorePages`] when every page is loaded.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn load_next_page(&self) -> Result<PageLoad<R>, PagerError> {
        let slot = self.slot.load_full();
        if !slot.pager.has_next_page() {
            return Err(PagerError::NoMorePages);
        }

        self.load_listeners.loading();
        let listeners = Arc::clone(&self.load_listeners);
        let policy = slot.pager.query().cache_policy;
        let started = slot.pager.load_next_page_with(
            move |delivery| listeners.delivered(&delivery, policy),
            Some(slot.scope.child_token()),
        );
        if let Err(err) = &started {
            self.load_listeners.loaded(Err(err));
        }
        started
    }

    /// Whether the list ends with a [`AdapterItem::NextPageCell`].
    #[must_use]
    pub fn should_show_pagination_cell(&self) -> bool {
        self.pagination_cell_row().is_some()
    }

    /// Row index of the pagination cell, if one is shown.
    #[must_use]
    pub fn pagination_cell_row(&self) -> Option<usize> {
        self.rows().cell_row()
    }

    /// Number of rows: the loaded records plus the pagination cell, if shown.
    #[must_use]
    pub fn count(&self) -> usize {
        self.rows().count()
    }

    /// The row at `index`, or `None` past the end.
    #[must_use]
    pub fn item(&self, index: usize) -> Option<AdapterItem<R>> {
        self.rows().item(index)
    }

    /// Reads the current pager once so every derived row value agrees.
    fn rows(&self) -> Rows<R> {
        Rows {
            snapshot: self.slot.load().pager.snapshot(),
            pagination_enabled: self.config.pagination_enabled,
        }
    }

    /// Attaches a list observer. With autoload on, this reloads the list.
    ///
    /// # Panics
    ///
    /// With autoload on, panics if called outside a Tokio runtime.
    pub fn register_data_set_observer(
        &self,
        observer: Arc<dyn ObjectsChangedCallback>,
    ) -> ListenerRegistration {
        let registration = listeners::register(&self.observers, observer);
        if self.autoload() {
            self.autoload_objects();
        }
        registration
    }

    /// Turns autoload on or off. Turning it on while observed and empty
    /// loads the first page.
    pub fn set_autoload(&self, autoload: bool) {
        if self.autoload.swap(autoload, Ordering::AcqRel) == autoload {
            return;
        }
        if autoload && !self.observers.is_empty() && self.objects().is_empty() {
            self.autoload_objects();
        }
    }

    pub fn add_on_query_load_listener(&self, listener: Arc<dyn OnQueryLoadListener<R>>) -> ListenerId {
        let id = ListenerId::next(&self.load_listeners.next_id);
        self.load_listeners.listeners.insert(id, listener);
        id
    }

    pub fn remove_on_query_load_listener(&self, id: ListenerId) -> bool {
        self.load_listeners.listeners.remove(&id).is_some()
    }

    fn autoload_objects(&self) {
        if let Err(err) = self.load_objects() {
            warn!(%err, "autoload failed to start");
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use querypager_core::Record;

    use super::*;
    use crate::executor::MemoryQueryExecutor;
    use crate::listeners::tests::RecordingCallback;
    use crate::testing::{numbered, wait_until, GatedExecutor};

    fn items() -> Query {
        Query::new("items").order_by_ascending("n")
    }

    fn config(objects_per_page: usize) -> AdapterConfig {
        AdapterConfig {
            objects_per_page,
            autoload: false,
            ..AdapterConfig::default()
        }
    }

    fn adapter(n: usize, config: AdapterConfig) -> (QueryAdapter<Record>, Arc<MemoryQueryExecutor>) {
        let executor = Arc::new(MemoryQueryExecutor::with_collection("items", numbered(n)));
        let adapter = QueryAdapter::<Record>::new(items, executor.clone(), config).unwrap();
        (adapter, executor)
    }

    #[derive(Default)]
    struct RecordingLoads {
        events: Mutex<Vec<String>>,
    }

    impl RecordingLoads {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl OnQueryLoadListener<Record> for RecordingLoads {
        fn on_loading(&self) {
            self.events.lock().push("loading".to_string());
        }

        fn on_loaded(&self, result: Result<&[Record], &PagerError>) {
            let event = match result {
                Ok(records) => format!("loaded:{}", records.len()),
                Err(err) => format!("error:{err}"),
            };
            self.events.lock().push(event);
        }
    }

    fn recording_loads(adapter: &QueryAdapter<Record>) -> (Arc<RecordingLoads>, ListenerId) {
        let listener = Arc::new(RecordingLoads::default());
        let id = adapter.add_on_query_load_listener(listener.clone());
        (listener, id)
    }

    fn observe(adapter: &QueryAdapter<Record>) -> (Arc<RecordingCallback>, ListenerRegistration) {
        let callback = Arc::new(RecordingCallback::default());
        let registration = adapter.register_data_set_observer(callback.clone());
        (callback, registration)
    }

    #[test]
    fn zero_objects_per_page_is_rejected() {
        let executor = Arc::new(MemoryQueryExecutor::new());
        let result = QueryAdapter::<Record>::new(items, executor, config(0));
        assert!(matches!(result, Err(ConfigError::ZeroPageSize)));
    }

    fn layout(len: u32, has_next_page: bool, pagination_enabled: bool) -> Rows<u32> {
        Rows {
            snapshot: PagerSnapshot {
                objects: Arc::new((0..len).collect()),
                current_page: 0,
                has_next_page,
                is_loading_next_page: false,
            },
            pagination_enabled,
        }
    }

    #[test]
    fn row_layout_is_derived_from_one_snapshot() {
        let rows = layout(4, true, true);
        assert_eq!(rows.cell_row(), Some(4));
        assert_eq!(rows.count(), 5);
        assert_eq!(rows.item(3), Some(AdapterItem::Object(3)));
        assert_eq!(rows.item(4), Some(AdapterItem::NextPageCell));
        assert_eq!(rows.item(5), None);

        let last_page = layout(4, false, true);
        assert_eq!(last_page.cell_row(), None);
        assert_eq!(last_page.count(), 4);
        assert_eq!(last_page.item(4), None);

        assert_eq!(layout(0, true, true).count(), 0);
        assert_eq!(layout(4, true, false).item(4), None);
    }

    #[test]
    fn settings_come_from_config() {
        let (adapter, _) = adapter(0, config(7));
        assert_eq!(adapter.objects_per_page(), 7);
        assert!(adapter.pagination_enabled());
        assert!(!adapter.autoload());
        assert_eq!(adapter.pager().page_size(), 7);
        assert_eq!(adapter.count(), 0);
        assert_eq!(adapter.item(0), None);
    }

    #[tokio::test]
    async fn pagination_cell_follows_has_next_page() {
        let (adapter, _) = adapter(10, config(4));
        let all = numbered(10);

        adapter.load_objects().unwrap().await.unwrap();
        assert!(adapter.should_show_pagination_cell());
        assert_eq!(adapter.count(), 5);
        assert_eq!(adapter.pagination_cell_row(), Some(4));
        assert_eq!(adapter.item(0), Some(AdapterItem::Object(all[0].clone())));
        assert_eq!(adapter.item(4), Some(AdapterItem::NextPageCell));
        assert_eq!(adapter.item(5), None);

        adapter.load_next_page().unwrap().await.unwrap();
        assert_eq!(adapter.count(), 9);

        adapter.load_next_page().unwrap().await.unwrap();
        assert!(!adapter.should_show_pagination_cell());
        assert_eq!(adapter.count(), 10);
        assert_eq!(adapter.pagination_cell_row(), None);
        assert_eq!(adapter.item(9), Some(AdapterItem::Object(all[9].clone())));
        assert_eq!(adapter.item(10), None);
        assert_eq!(adapter.load_next_page().unwrap_err(), PagerError::NoMorePages);
    }

    #[tokio::test]
    async fn pagination_disabled_shows_one_page_without_cell() {
        let (adapter, _) = adapter(
            10,
            AdapterConfig {
                pagination_enabled: false,
                ..config(4)
            },
        );
        adapter.load_objects().unwrap().await.unwrap();
        assert_eq!(adapter.count(), 4);
        assert_eq!(adapter.pagination_cell_row(), None);
        assert!(adapter.load_next_page().is_err());
    }

    #[tokio::test]
    async fn empty_result_shows_no_cell() {
        let (adapter, _) = adapter(0, config(4));
        adapter.load_objects().unwrap().await.unwrap();
        assert_eq!(adapter.count(), 0);
        assert!(!adapter.should_show_pagination_cell());
    }

    #[tokio::test]
    async fn load_objects_restarts_from_first_page() {
        let (adapter, _) = adapter(10, config(4));
        adapter.load_objects().unwrap().await.unwrap();
        adapter.load_next_page().unwrap().await.unwrap();
        assert_eq!(adapter.objects().len(), 8);

        adapter.load_objects().unwrap().await.unwrap();
        assert_eq!(adapter.objects().len(), 4);
        assert_eq!(adapter.pager().current_page(), 0);
    }

    #[tokio::test]
    async fn clear_swaps_pager_and_cancels_running_load() {
        let executor = Arc::new(GatedExecutor::new(Arc::new(MemoryQueryExecutor::with_collection(
            "items",
            numbered(10),
        ))));
        let adapter = QueryAdapter::<Record>::new(items, executor.clone(), config(4)).unwrap();
        let (loads, _) = recording_loads(&adapter);
        let (changes, _registration) = observe(&adapter);

        let load = adapter.load_objects().unwrap();
        let old_pager = adapter.pager();
        adapter.clear();
        assert_eq!(load.await, Err(PagerError::Cancelled));

        executor.release(1);
        assert_eq!(adapter.count(), 0);
        assert!(!adapter.is_loading());
        assert!(old_pager.is_empty());
        assert_eq!(loads.events(), vec!["loading"]);
        assert_eq!(changes.events(), vec![ObjectsChange::Reset, ObjectsChange::Reset]);
    }

    #[tokio::test]
    async fn observers_receive_forwarded_changes() {
        let (adapter, _) = adapter(6, config(4));
        let (changes, registration) = observe(&adapter);

        adapter.load_objects().unwrap().await.unwrap();
        adapter.load_next_page().unwrap().await.unwrap();
        assert_eq!(
            changes.events(),
            vec![
                ObjectsChange::Reset,
                ObjectsChange::RangeInserted { position_start: 0, item_count: 4 },
                ObjectsChange::RangeInserted { position_start: 4, item_count: 2 },
            ]
        );

        drop(registration);
        adapter.clear();
        assert_eq!(changes.events().len(), 3);
    }

    #[tokio::test]
    async fn load_listeners_bracket_each_load() {
        let (adapter, _) = adapter(7, config(5));
        let (loads, _) = recording_loads(&adapter);

        adapter.load_objects().unwrap().await.unwrap();
        adapter.load_next_page().unwrap().await.unwrap();
        assert_eq!(loads.events(), vec!["loading", "loaded:5", "loading", "loaded:2"]);
    }

    #[tokio::test]
    async fn load_listeners_see_failures() {
        let (adapter, executor) = adapter(7, config(5));
        let (loads, _) = recording_loads(&adapter);
        executor.set_offline(true);

        let err = adapter.load_objects().unwrap().await.unwrap_err();
        assert!(matches!(err, PagerError::Query(_)));
        assert_eq!(loads.events().len(), 2);
        assert!(loads.events()[1].starts_with("error:"));
    }

    #[tokio::test]
    async fn cache_only_miss_is_silent() {
        let executor = Arc::new(MemoryQueryExecutor::with_collection("items", numbered(7)));
        let factory = || items().with_cache_policy(CachePolicy::CacheOnly);
        let adapter = QueryAdapter::<Record>::new(factory, executor, config(5)).unwrap();
        let (loads, _) = recording_loads(&adapter);

        let result = adapter.load_objects().unwrap().await;
        assert!(result.is_err());
        assert_eq!(loads.events(), vec!["loading"]);
        assert_eq!(adapter.count(), 0);
    }

    #[tokio::test]
    async fn cache_then_network_reports_both_deliveries() {
        let executor = Arc::new(MemoryQueryExecutor::with_collection("items", numbered(7)));
        let factory = || items().with_cache_policy(CachePolicy::CacheThenNetwork);
        let adapter = QueryAdapter::<Record>::new(factory, executor.clone(), config(5)).unwrap();
        executor.prime_cache(&adapter.pager().page_query(0), numbered(3));
        let (loads, _) = recording_loads(&adapter);

        adapter.load_objects().unwrap().await.unwrap();
        assert_eq!(loads.events(), vec!["loading", "loaded:3", "loaded:5"]);
        assert_eq!(adapter.count(), 6);
    }

    #[tokio::test]
    async fn cache_then_network_reports_cache_miss_before_network_page() {
        let executor = Arc::new(MemoryQueryExecutor::with_collection("items", numbered(7)));
        let factory = || items().with_cache_policy(CachePolicy::CacheThenNetwork);
        let adapter = QueryAdapter::<Record>::new(factory, executor, config(5)).unwrap();
        let (loads, _) = recording_loads(&adapter);

        adapter.load_objects().unwrap().await.unwrap();
        let events = loads.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], "loading");
        assert!(events[1].starts_with("error:"));
        assert_eq!(events[2], "loaded:5");
        assert_eq!(adapter.count(), 6);
    }

    #[tokio::test]
    async fn removed_load_listener_is_not_called() {
        let (adapter, _) = adapter(3, config(5));
        let (loads, id) = recording_loads(&adapter);
        assert!(adapter.remove_on_query_load_listener(id));
        assert!(!adapter.remove_on_query_load_listener(id));

        adapter.load_objects().unwrap().await.unwrap();
        assert!(loads.events().is_empty());
    }

    #[tokio::test]
    async fn attaching_observer_autoloads() {
        let (adapter, executor) = adapter(
            10,
            AdapterConfig {
                autoload: true,
                ..config(4)
            },
        );
        let (_changes, _registration) = observe(&adapter);
        wait_until(|| adapter.objects().len() == 4).await;
        assert_eq!(executor.find_count(), 1);
    }

    #[tokio::test]
    async fn enabling_autoload_loads_observed_empty_list() {
        let (adapter, executor) = adapter(10, config(4));
        let (_changes, _registration) = observe(&adapter);
        assert_eq!(executor.find_count(), 0);

        adapter.set_autoload(true);
        wait_until(|| adapter.objects().len() == 4).await;

        // Already on: no second load.
        adapter.set_autoload(true);
        assert_eq!(executor.find_count(), 1);
    }

    #[tokio::test]
    async fn enabling_autoload_without_observers_does_nothing() {
        let (adapter, executor) = adapter(10, config(4));
        adapter.set_autoload(true);
        assert!(adapter.autoload());
        tokio::task::yield_now().await;
        assert_eq!(executor.find_count(), 0);
    }
}
