//! Pages through a synthetic in-memory collection and prints every page.
//!
//! ```bash
//! querypager-demo --records 53 --page-size 10 --policy cache-then-network --warm-cache
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `querypager=info`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use querypager::{MemoryQueryExecutor, ObjectsChangedCallback, Pager, PagerConfig, PagerError};
use querypager_core::{CachePolicy, Query, QueryError, Record};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    NetworkOnly,
    CacheOnly,
    CacheElseNetwork,
    CacheThenNetwork,
}

impl From<PolicyArg> for CachePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::NetworkOnly => CachePolicy::NetworkOnly,
            PolicyArg::CacheOnly => CachePolicy::CacheOnly,
            PolicyArg::CacheElseNetwork => CachePolicy::CacheElseNetwork,
            PolicyArg::CacheThenNetwork => CachePolicy::CacheThenNetwork,
        }
    }
}

/// Query pager demo
#[derive(Parser, Debug)]
#[command(name = "querypager-demo")]
#[command(about = "Pages through a synthetic collection with a query pager")]
struct Args {
    /// Number of records in the synthetic collection
    #[arg(long, default_value = "53", env = "QUERYPAGER_RECORDS")]
    records: usize,

    /// Records per page
    #[arg(long, default_value = "25", env = "QUERYPAGER_PAGE_SIZE")]
    page_size: usize,

    /// Cache policy of the page queries
    #[arg(long, value_enum, default_value = "network-only", env = "QUERYPAGER_POLICY")]
    policy: PolicyArg,

    /// Simulated network latency in milliseconds
    #[arg(long, default_value = "0", env = "QUERYPAGER_LATENCY_MS")]
    latency_ms: u64,

    /// Fill the cache with a network pass before paging
    #[arg(long)]
    warm_cache: bool,

    /// Load a single unpaginated page
    #[arg(long)]
    no_pagination: bool,

    /// Print records as JSON lines instead of ids
    #[arg(long)]
    json: bool,
}

/// Logs list changes the way a list view would receive them.
struct LogChanges;

impl ObjectsChangedCallback for LogChanges {
    fn on_changed(&self) {
        info!("list reset");
    }

    fn on_item_range_changed(&self, position_start: usize, item_count: usize) {
        info!(position_start, item_count, "rows changed");
    }

    fn on_item_range_inserted(&self, position_start: usize, item_count: usize) {
        info!(position_start, item_count, "rows inserted");
    }
}

fn synthetic_records(count: usize) -> anyhow::Result<Vec<Record>> {
    (0..count)
        .map(|i| {
            let n = i64::try_from(i).context("record index overflows i64")?;
            Ok(Record::new(format!("item-{i:05}"))
                .with("n", n)
                .with("label", format!("Item #{i}"))
                .with("even", i % 2 == 0))
        })
        .collect()
}

fn base_query() -> Query {
    Query::new("items").order_by_ascending("n")
}

/// Pages through the collection once with `NetworkOnly`, filling the cache.
async fn warm_cache(executor: &Arc<MemoryQueryExecutor>, config: &PagerConfig) -> anyhow::Result<()> {
    let pager = Pager::<Record>::with_config(base_query(), executor.clone(), config.clone())?;
    while pager.has_next_page() {
        pager.load_next_page(None)?.await?;
    }
    info!(records = pager.len(), "cache warmed");
    Ok(())
}

fn print_page(page: usize, records: &[Record], json: bool) -> anyhow::Result<()> {
    if json {
        for record in records {
            println!("{}", serde_json::to_string(record)?);
        }
    } else {
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        println!("page {page}: {}", ids.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("querypager=info".parse()?)
                .add_directive("querypager_demo=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = PagerConfig {
        page_size: args.page_size,
        pagination_enabled: !args.no_pagination,
    };
    config.validate()?;

    let executor = Arc::new(MemoryQueryExecutor::with_collection(
        "items",
        synthetic_records(args.records)?,
    ));
    executor.set_latency(Duration::from_millis(args.latency_ms));
    if args.warm_cache {
        warm_cache(&executor, &config).await?;
    }

    let query = base_query().with_cache_policy(args.policy.into());
    let pager = Pager::<Record>::with_config(query, executor.clone(), config)?;
    let _changes = pager.add_on_objects_changed_callback(Arc::new(LogChanges));

    while pager.has_next_page() {
        let load = pager.load_next_page_with(
            |delivery| match &delivery.result {
                Ok(records) => info!(
                    page = delivery.page,
                    source = delivery.source.map_or("none", |s| s.as_str()),
                    item_count = records.len(),
                    "delivery"
                ),
                Err(err) => warn!(page = delivery.page, %err, "delivery failed"),
            },
            None,
        )?;
        let page = load.page();
        match load.await {
            Ok(records) => print_page(page, &records, args.json)?,
            Err(PagerError::Query(QueryError::CacheMiss)) => {
                warn!(page, "page is not cached; rerun with --warm-cache");
                break;
            }
            Err(err) => bail!("loading page {page} failed: {err}"),
        }
    }

    info!(
        records = pager.len(),
        pages = pager.current_page() + 1,
        queries = executor.find_count(),
        "done"
    );
    Ok(())
}
