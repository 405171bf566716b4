//! Change-notification callbacks and their registry.
//!
//! Defines [`ObjectsChangedCallback`] for reacting to changes of a pager's
//! result list, and [`ListenerSet`] which fans notifications out to every
//! registered callback. Registrations are explicit: each one yields a
//! [`ListenerRegistration`] that unregisters its callback when dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

/// Identity of one callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates the next id from `counter`.
    pub(crate) fn next(counter: &AtomicU64) -> Self {
        Self(counter.fetch_add(1, Ordering::Relaxed))
    }
}

/// A change to the ordered result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectsChange {
    /// The whole list changed in an unspecified way (e.g. it was cleared).
    Reset,
    /// An existing slot range was overwritten.
    RangeChanged {
        position_start: usize,
        item_count: usize,
    },
    /// A new slot range was appended.
    RangeInserted {
        position_start: usize,
        item_count: usize,
    },
}

/// Observer of a pager's result list.
///
/// Invoked synchronously on whichever task performed the change. Callers that
/// need delivery on a particular thread must hop there themselves.
///
/// Used as `Arc<dyn ObjectsChangedCallback>`.
pub trait ObjectsChangedCallback: Send + Sync {
    /// Called when the entire list was replaced or cleared.
    fn on_changed(&self) {}

    /// Called when `item_count` items starting at `position_start` were overwritten.
    fn on_item_range_changed(&self, position_start: usize, item_count: usize) {
        let _ = (position_start, item_count);
    }

    /// Called when `item_count` items were inserted at `position_start`.
    fn on_item_range_inserted(&self, position_start: usize, item_count: usize) {
        let _ = (position_start, item_count);
    }
}

/// Registry that fans out [`ObjectsChange`]s to every registered callback.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    callbacks: DashMap<ListenerId, Arc<dyn ObjectsChangedCallback>>,
}

impl ListenerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback and returns its identity.
    pub fn insert(&self, callback: Arc<dyn ObjectsChangedCallback>) -> ListenerId {
        let id = ListenerId::next(&self.next_id);
        self.callbacks.insert(id, callback);
        id
    }

    /// Removes a callback. Returns `false` if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Delivers `change` to every registered callback.
    ///
    /// Callbacks are collected before any is invoked, so a callback may
    /// register or unregister listeners (itself included) while being notified.
    pub fn notify(&self, change: ObjectsChange) {
        let callbacks: Vec<Arc<dyn ObjectsChangedCallback>> = self
            .callbacks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for callback in callbacks {
            match change {
                ObjectsChange::Reset => callback.on_changed(),
                ObjectsChange::RangeChanged {
                    position_start,
                    item_count,
                } => callback.on_item_range_changed(position_start, item_count),
                ObjectsChange::RangeInserted {
                    position_start,
                    item_count,
                } => callback.on_item_range_inserted(position_start, item_count),
            }
        }
    }
}

/// Registers `callback` on `set`, returning a guard that unregisters it on drop.
pub fn register(
    set: &Arc<ListenerSet>,
    callback: Arc<dyn ObjectsChangedCallback>,
) -> ListenerRegistration {
    ListenerRegistration {
        id: set.insert(callback),
        set: Arc::downgrade(set),
    }
}

/// RAII handle for a callback registration.
///
/// Dropping the handle unregisters the callback. The handle does not keep
/// the owning pager alive.
#[derive(Debug)]
#[must_use = "dropping the registration immediately unregisters the callback"]
pub struct ListenerRegistration {
    id: ListenerId,
    set: Weak<ListenerSet>,
}

impl ListenerRegistration {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Keeps the callback registered for the lifetime of its owner.
    ///
    /// The returned id can still be passed to an explicit remove call.
    pub fn detach(self) -> ListenerId {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}
