//! Test-only executors shared by the pager and adapter tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use querypager_core::{Query, QueryError, Record};
use tokio::sync::Semaphore;

use crate::executor::MemoryQueryExecutor;
use crate::traits::{DeliverySink, DeliverySource, QueryExecutor};

/// Records numbered `0..n` with ids `r000`, `r001`, ... and an `n` field.
pub(crate) fn numbered(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(format!("r{i:03}")).with("n", i64::try_from(i).unwrap()))
        .collect()
}

pub(crate) fn ids(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

/// Polls `condition` until it holds, failing the test after about a second.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Wraps a [`MemoryQueryExecutor`] and holds every execution until released.
///
/// Each `release(n)` lets `n` executions proceed. Dispatched queries are
/// recorded so tests can check what the pager asked for.
pub(crate) struct GatedExecutor {
    pub(crate) inner: Arc<MemoryQueryExecutor>,
    gate: Semaphore,
    queries: Mutex<Vec<Query>>,
}

impl GatedExecutor {
    pub(crate) fn new(inner: Arc<MemoryQueryExecutor>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn release(&self, executions: usize) {
        self.gate.add_permits(executions);
    }

    pub(crate) fn dispatched(&self) -> Vec<Query> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor<Record> for GatedExecutor {
    async fn find(&self, query: Query, sink: DeliverySink<Record>) {
        self.queries.lock().push(query.clone());
        let Ok(permit) = self.gate.acquire().await else {
            return;
        };
        permit.forget();
        self.inner.find(query, sink).await;
    }
}

/// Executor that replays a fixed list of deliveries for every execution.
pub(crate) struct ScriptedExecutor {
    pub(crate) script: Vec<(DeliverySource, Result<Vec<Record>, QueryError>)>,
}

#[async_trait]
impl QueryExecutor<Record> for ScriptedExecutor {
    async fn find(&self, _query: Query, sink: DeliverySink<Record>) {
        for (source, result) in &self.script {
            if !sink.deliver(*source, result.clone()).await {
                return;
            }
        }
    }
}
