//! Bundled [`QueryExecutor`](crate::QueryExecutor) implementations.

pub mod memory;

pub use memory::MemoryQueryExecutor;
