//! Paged, cancellable, incrementally-merging query result fetcher.
//!
//! [`Pager`] loads a query page by page through an injected
//! [`QueryExecutor`] and merges every page into one ordered list, notifying
//! registered [`ObjectsChangedCallback`]s. [`adapter::QueryAdapter`] layers a
//! headless list model with a "load more" cell on top.

pub mod adapter;
pub mod config;
pub mod error;
pub mod executor;
pub mod listeners;
pub mod pager;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AdapterItem, OnQueryLoadListener, QueryAdapter, QueryFactory};
pub use config::{AdapterConfig, ConfigError, PagerConfig};
pub use error::PagerError;
pub use executor::MemoryQueryExecutor;
pub use listeners::{ListenerId, ListenerRegistration, ObjectsChange, ObjectsChangedCallback};
pub use pager::{PageDelivery, PageLoad, Pager, PagerSnapshot};
pub use traits::{Delivery, DeliverySink, DeliverySource, QueryExecutor};
