//! Tagged results shared by the services.

use serde::{Deserialize, Serialize};

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Nothing to delete
    NotFound,
    /// Flagged deleted and kept for audit
    SoftDeleted,
    /// Removed from the backend and the store
    Deleted,
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Outcome of a connectivity test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityResult {
    Success,
    Failure { message: String },
}

impl ConnectivityResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure { message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Page request: zero-based page index and a size within `1..=MAX_SIZE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPageRequest")]
pub struct PageRequest {
    page: usize,
    size: usize,
}

/// Wire form, clamped on the way in
#[derive(Deserialize)]
struct RawPageRequest {
    page: usize,
    size: usize,
}

impl From<RawPageRequest> for PageRequest {
    fn from(raw: RawPageRequest) -> Self {
        Self::new(raw.page, raw.size)
    }
}

impl PageRequest {
    pub const MAX_SIZE: usize = 100;

    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size: size.clamp(1, Self::MAX_SIZE) }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

/// One page of results plus the total across all pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Slice an already sorted collection
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(request.offset()).take(request.size).collect();
        Self { items, page: request.page, size: request.size, total }
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.size.max(1))
    }
}
