//! Pager and adapter configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Largest accepted page size; the probe limit (`page_size + 1`) must fit in a `u32`.
pub const MAX_PAGE_SIZE: usize = u32::MAX as usize - 1;

/// Configuration errors detected by `validate()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("page size must be greater than zero")]
    ZeroPageSize,
    #[error("page size {0} exceeds the maximum of {MAX_PAGE_SIZE}")]
    PageSizeTooLarge(usize),
}

/// Settings fixed for the lifetime of a [`Pager`](crate::Pager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PagerConfig {
    /// Number of records per page.
    pub page_size: usize,
    /// When disabled, the single page query is limited to exactly
    /// `page_size` records and the pager never reports a following page.
    pub pagination_enabled: bool,
}

impl PagerConfig {
    /// Checks that the page size is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `page_size` is zero or too large.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_page_size(self.page_size)
    }
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pagination_enabled: true,
        }
    }
}

/// Settings for a [`QueryAdapter`](crate::adapter::QueryAdapter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Page size of every pager the adapter creates.
    pub objects_per_page: usize,
    /// Whether to page at all and show a "load more" cell.
    pub pagination_enabled: bool,
    /// Whether attaching the first observer triggers `load_objects()`.
    pub autoload: bool,
}

impl AdapterConfig {
    /// Checks that the page size is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `objects_per_page` is zero or too large.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_page_size(self.objects_per_page)
    }

    /// Pager settings derived from this adapter configuration.
    #[must_use]
    pub fn pager_config(&self) -> PagerConfig {
        PagerConfig {
            page_size: self.objects_per_page,
            pagination_enabled: self.pagination_enabled,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            objects_per_page: DEFAULT_PAGE_SIZE,
            pagination_enabled: true,
            autoload: true,
        }
    }
}

fn validate_page_size(page_size: usize) -> Result<(), ConfigError> {
    if page_size == 0 {
        return Err(ConfigError::ZeroPageSize);
    }
    if page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::PageSizeTooLarge(page_size));
    }
    Ok(())
}
