//! Mutable pager state and the page-merge algorithm.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::listeners::ObjectsChange;

/// Whether a page query's limit lets a merge detect a following page.
///
/// Only probe-limited queries (any bounded limit other than exactly
/// `page_size`) can tell whether more records exist. An unbounded limit or a
/// limit of exactly `page_size` means pagination is off.
pub(crate) fn detects_next_page(limit: Option<u32>, page_size: usize) -> bool {
    limit.is_some_and(|l| l as usize != page_size)
}

/// Result of merging one page.
#[derive(Debug)]
pub(crate) struct MergeOutcome<R> {
    pub(crate) change: ObjectsChange,
    /// The page's records after the probe record was removed.
    pub(crate) records: Vec<R>,
    pub(crate) has_next_page: bool,
}

/// A merge that would leave a hole in the result list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("page {page} starts at {start} but only {len} objects are loaded")]
pub(crate) struct MergeGap {
    pub(crate) page: usize,
    pub(crate) start: usize,
    pub(crate) len: usize,
}

/// Everything a pager mutates, guarded by the pager's state mutex.
pub(crate) struct PagerState<R> {
    /// Merged records; replaced copy-on-write so readers keep stable snapshots.
    pub(crate) objects: Arc<Vec<R>>,
    pub(crate) current_page: i64,
    pub(crate) has_next_page: bool,
    /// Cancelled and replaced by `clear`, so loads started earlier never merge.
    pub(crate) scope: CancellationToken,
    load_generation: u64,
    loading: Option<u64>,
}

impl<R> PagerState<R> {
    pub(crate) fn new() -> Self {
        Self {
            objects: Arc::new(Vec::new()),
            current_page: -1,
            has_next_page: true,
            scope: CancellationToken::new(),
            load_generation: 0,
            loading: None,
        }
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    /// Marks a new load as the most recent one and returns its generation.
    pub(crate) fn begin_load(&mut self) -> u64 {
        self.load_generation += 1;
        self.loading = Some(self.load_generation);
        self.load_generation
    }

    /// Clears the loading flag if `generation` is still the most recent load.
    pub(crate) fn finish_load(&mut self, generation: u64) {
        if self.loading == Some(generation) {
            self.loading = None;
        }
    }

    /// Returns to the initial state and cancels every load started so far.
    pub(crate) fn reset(&mut self) {
        self.scope.cancel();
        self.scope = CancellationToken::new();
        self.objects = Arc::new(Vec::new());
        self.current_page = -1;
        self.has_next_page = true;
        // Keep the generation counter so late completions still mismatch.
        self.loading = None;
    }
}

impl<R: Clone> PagerState<R> {
    /// Splices `results` into the slot range of `page`.
    ///
    /// With `probing` set, a result longer than `page_size` proves a following
    /// page exists; the extra probe record is dropped before merging. Without
    /// it the pager is unpaginated and never reports a following page.
    ///
    /// A page already present is overwritten in place and reported as
    /// `RangeChanged`; a page at the end is appended and reported as
    /// `RangeInserted`. `current_page` never moves backwards, and a stale page
    /// behind it only updates content.
    pub(crate) fn merge(
        &mut self,
        page: usize,
        mut results: Vec<R>,
        page_size: usize,
        probing: bool,
    ) -> Result<MergeOutcome<R>, MergeGap> {
        let start = page * page_size;
        let len = self.objects.len();
        if start > len {
            return Err(MergeGap { page, start, len });
        }

        let has_next_page = probing && results.len() > page_size;
        if probing {
            results.truncate(page_size);
        }
        let item_count = results.len();

        let objects = Arc::make_mut(&mut self.objects);
        let change = if len > start {
            let end = len.min(start + page_size);
            objects.splice(start..end, results.iter().cloned());
            ObjectsChange::RangeChanged {
                position_start: start,
                item_count,
            }
        } else {
            objects.extend(results.iter().cloned());
            ObjectsChange::RangeInserted {
                position_start: start,
                item_count,
            }
        };

        let page = i64::try_from(page).unwrap_or(i64::MAX);
        if page >= self.current_page {
            self.current_page = page;
            self.has_next_page = has_next_page;
        }

        Ok(MergeOutcome {
            change,
            records: results,
            has_next_page: self.has_next_page,
        })
    }
}
