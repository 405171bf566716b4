//! Query pager core: records, field values, query descriptors, and cache policies.

pub mod error;
pub mod query;
pub mod types;

pub use error::QueryError;
pub use query::{CachePolicy, Predicate, PredicateOp, Query, SortDirection, SortKey};
pub use types::{Record, Value};
